//! Core timeline evaluation: `resolve()` takes a tree and a query time and
//! produces the ordered set of active nodes.
//!
//! The evaluation process:
//! 1. Walk the tree depth-first in document order, starting with the root
//!    bounds `[0, end)`.
//! 2. Skip disabled nodes together with everything below them.
//! 3. Resolve each node's window against its parent's window.
//! 4. Keep nodes whose window contains `t`; recurse into included containers
//!    with their own window as the children's parent bounds.
//!
//! Evaluation is pure: the same tree and time always give the same set.

use tracing::debug;

use crate::error::TimelineEvalError;
use crate::interval::{resolve_window, ParentBounds, Window};
use crate::types::{LeafNode, NodeId, TimelineNode, TimelineTree};

/// Maximum container nesting depth.
pub const MAX_NESTING_DEPTH: usize = 64;

/// One active node at a query time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ActivationEntry {
    pub node: NodeId,
    /// Nesting depth, 0 for root-level nodes.
    pub depth: usize,
    pub absolute_start: f64,
    pub absolute_end: f64,
    /// `query_time - absolute_start`.
    pub local_time: f64,
    pub is_container: bool,
}

impl ActivationEntry {
    pub fn window(&self) -> Window {
        Window::new(self.absolute_start, self.absolute_end)
    }
}

/// Result of one activation pass, in depth-first document order.
///
/// Containers appear before their children so consumers can establish a
/// container's local coordinate space before drawing into it.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivationSet {
    pub query_time: f64,
    entries: Vec<ActivationEntry>,
}

impl ActivationSet {
    pub fn entries(&self) -> &[ActivationEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivationEntry> {
        self.entries.iter()
    }

    /// Leaf entries only.
    pub fn leaves(&self) -> impl Iterator<Item = &ActivationEntry> {
        self.entries.iter().filter(|e| !e.is_container)
    }

    pub fn get(&self, node: NodeId) -> Option<&ActivationEntry> {
        self.entries.iter().find(|e| e.node == node)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.get(node).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn root_bounds(tree: &TimelineTree) -> ParentBounds {
    ParentBounds::new(0.0, tree.end())
}

/// Compute the active nodes of `tree` at `query_time`.
pub fn resolve(tree: &TimelineTree, query_time: f64) -> Result<ActivationSet, TimelineEvalError> {
    let mut entries = Vec::new();
    resolve_level(
        tree,
        tree.roots(),
        root_bounds(tree),
        query_time,
        0,
        &mut entries,
    )?;
    Ok(ActivationSet {
        query_time,
        entries,
    })
}

fn resolve_level(
    tree: &TimelineTree,
    ids: &[NodeId],
    parent: ParentBounds,
    t: f64,
    depth: usize,
    out: &mut Vec<ActivationEntry>,
) -> Result<(), TimelineEvalError> {
    if depth >= MAX_NESTING_DEPTH && !ids.is_empty() {
        return Err(TimelineEvalError::NestingTooDeep {
            max_depth: MAX_NESTING_DEPTH,
            path: format!("depth {depth}"),
        });
    }

    for &id in ids {
        let node = tree.node(id)?;
        if node.disabled {
            continue;
        }

        let window = resolve_window(id, node, parent)?;
        if !window.contains(t) {
            continue;
        }

        out.push(ActivationEntry {
            node: id,
            depth,
            absolute_start: window.start,
            absolute_end: window.end,
            local_time: t - window.start,
            is_container: node.is_container(),
        });

        if node.is_container() {
            resolve_level(tree, node.children(), window.into(), t, depth + 1, out)?;
        }
    }
    Ok(())
}

/// Position inside the leaf's source media for an active entry.
pub fn media_time(entry: &ActivationEntry, leaf: &LeafNode) -> f64 {
    entry.local_time + leaf.media_start
}

/// A node with its resolved window, independent of any query time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ResolvedNode {
    pub node: NodeId,
    pub depth: usize,
    pub window: Window,
    /// Disabled itself or below a disabled container.
    pub disabled: bool,
}

/// Resolve every node of the tree in depth-first document order.
///
/// Timing errors are fatal for enabled nodes. Inside disabled subtrees they
/// drop the offending subtree instead, since those nodes never play.
pub fn flatten(tree: &TimelineTree) -> Result<Vec<ResolvedNode>, TimelineEvalError> {
    let mut out = Vec::with_capacity(tree.len());
    flatten_level(tree, tree.roots(), root_bounds(tree), false, 0, &mut out)?;
    Ok(out)
}

fn flatten_level(
    tree: &TimelineTree,
    ids: &[NodeId],
    parent: ParentBounds,
    parent_disabled: bool,
    depth: usize,
    out: &mut Vec<ResolvedNode>,
) -> Result<(), TimelineEvalError> {
    if depth >= MAX_NESTING_DEPTH && !ids.is_empty() {
        return Err(TimelineEvalError::NestingTooDeep {
            max_depth: MAX_NESTING_DEPTH,
            path: format!("depth {depth}"),
        });
    }

    for &id in ids {
        let node: &TimelineNode = tree.node(id)?;
        let disabled = parent_disabled || node.disabled;

        let window = match resolve_window(id, node, parent) {
            Ok(window) => window,
            Err(e) if disabled => {
                debug!(node = %id, error = %e, "Skipping unresolvable disabled subtree");
                continue;
            }
            Err(e) => return Err(e),
        };

        out.push(ResolvedNode {
            node: id,
            depth,
            window,
            disabled,
        });
        if node.is_container() {
            flatten_level(tree, node.children(), window.into(), disabled, depth + 1, out)?;
        }
    }
    Ok(())
}

/// Latest end over enabled root-level nodes; 0 for an empty timeline.
pub fn timeline_duration(tree: &TimelineTree) -> Result<f64, TimelineEvalError> {
    let bounds = root_bounds(tree);
    let mut duration: f64 = 0.0;
    for &id in tree.roots() {
        let node = tree.node(id)?;
        if node.disabled {
            continue;
        }
        duration = duration.max(resolve_window(id, node, bounds)?.end);
    }
    Ok(duration)
}
