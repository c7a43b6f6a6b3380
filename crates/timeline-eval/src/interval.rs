//! Interval resolution: a node's `[start, end)` given its parent's bounds.
//!
//! Precedence is fixed: explicit `end` > explicit `duration` > the parent's
//! end. A missing `start` inherits the parent's start.

use crate::error::TimelineEvalError;
use crate::types::{NodeId, TimelineNode};

/// Tolerance when checking an explicit `duration` against an explicit `end`.
const CONSISTENCY_EPSILON_MS: f64 = 1e-6;

/// A resolved half-open time window in absolute milliseconds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Window {
    pub start: f64,
    pub end: f64,
}

impl Window {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t < self.end
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// Bounds handed down from the parent; the end may be unknown at the root.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ParentBounds {
    pub start: f64,
    pub end: Option<f64>,
}

impl ParentBounds {
    pub fn new(start: f64, end: Option<f64>) -> Self {
        Self { start, end }
    }
}

impl From<Window> for ParentBounds {
    fn from(window: Window) -> Self {
        Self {
            start: window.start,
            end: Some(window.end),
        }
    }
}

pub fn start_time(node: &TimelineNode, parent_start: f64) -> f64 {
    node.start.unwrap_or(parent_start)
}

pub fn end_time(
    id: NodeId,
    node: &TimelineNode,
    parent_start: f64,
    parent_end: Option<f64>,
) -> Result<f64, TimelineEvalError> {
    if let Some(end) = node.end {
        return Ok(end);
    }
    if let Some(duration) = node.duration {
        return Ok(start_time(node, parent_start) + duration);
    }
    parent_end.ok_or_else(|| unresolvable(id))
}

pub fn duration(
    id: NodeId,
    node: &TimelineNode,
    parent_start: f64,
    parent_end: Option<f64>,
) -> Result<f64, TimelineEvalError> {
    if let Some(duration) = node.duration {
        return Ok(duration);
    }
    let start = start_time(node, parent_start);
    if let Some(end) = node.end {
        return Ok(end - start);
    }
    parent_end
        .map(|end| end - start)
        .ok_or_else(|| unresolvable(id))
}

/// Resolve the node's absolute window, rejecting inconsistent timing.
pub fn resolve_window(
    id: NodeId,
    node: &TimelineNode,
    parent: ParentBounds,
) -> Result<Window, TimelineEvalError> {
    let start = start_time(node, parent.start);
    let end = end_time(id, node, parent.start, parent.end)?;

    if let (Some(duration), Some(explicit_end)) = (node.duration, node.end) {
        if (start + duration - explicit_end).abs() > CONSISTENCY_EPSILON_MS {
            return Err(TimelineEvalError::MalformedTiming {
                node: id,
                reason: format!(
                    "duration {duration} disagrees with end {explicit_end} (start {start})"
                ),
            });
        }
    }
    if end < start {
        return Err(TimelineEvalError::MalformedTiming {
            node: id,
            reason: format!("end {end} precedes start {start}"),
        });
    }
    Ok(Window { start, end })
}

fn unresolvable(id: NodeId) -> TimelineEvalError {
    TimelineEvalError::MalformedTiming {
        node: id,
        reason: "no end, duration, or parent end to inherit".into(),
    }
}
