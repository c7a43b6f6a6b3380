//! Project document loading: JSON → [`Project`] with an arena tree.
//!
//! ```json
//! {
//!   "width": 1920, "height": 1080, "audioSampleRate": 48000, "fps": 30,
//!   "end": "1:30",
//!   "childrenTimeline": [
//!     { "type": "container", "start": 1000, "childrenTimeline": [
//!       { "type": "video", "source": "intro.mp4", "videoStart": "0:02" }
//!     ]}
//!   ]
//! }
//! ```
//!
//! Node types are validated here; an unknown `type` rejects the whole
//! document.

use cl_common::{Rational, Resolution, SourceId, TimeMs};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::TimelineEvalError;
use crate::evaluator::MAX_NESTING_DEPTH;
use crate::time::{parse_time, TimeValue};
use crate::types::{
    AudioSource, LeafNode, MediaKind, NodeId, NodeKind, Project, TimelineNode, TimelineTree,
};

/// Fields consumed by the engine; everything else on a leaf becomes a prop.
const ENGINE_FIELDS: &[&str] = &[
    "type",
    "start",
    "duration",
    "end",
    "disabled",
    "source",
    "audioSource",
    "videoStart",
    "childrenTimeline",
];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProject {
    width: u32,
    height: u32,
    #[serde(default = "default_sample_rate")]
    audio_sample_rate: u32,
    fps: f64,
    end: TimeValue,
    #[serde(default)]
    children_timeline: Vec<Value>,
}

fn default_sample_rate() -> u32 {
    48_000
}

impl Project {
    /// Parse and validate a project document.
    pub fn from_json(json: &str) -> Result<Self, TimelineEvalError> {
        let raw: RawProject = serde_json::from_str(json)?;

        let fps = Rational::from_fps(raw.fps).ok_or_else(|| TimelineEvalError::InvalidProject {
            reason: format!("fps must be a positive number, got {}", raw.fps),
        })?;
        if raw.width == 0 || raw.height == 0 {
            return Err(TimelineEvalError::InvalidProject {
                reason: format!("resolution {}x{} is empty", raw.width, raw.height),
            });
        }
        let end = parse_time(&raw.end)?;
        if end < 0.0 {
            return Err(TimelineEvalError::InvalidProject {
                reason: format!("end {end} is negative"),
            });
        }

        let mut tree = TimelineTree::with_end(end);
        for (i, value) in raw.children_timeline.iter().enumerate() {
            let path = format!("childrenTimeline[{i}]");
            insert_node(&mut tree, None, value, &path, 0)?;
        }

        info!(
            nodes = tree.len(),
            end_ms = end,
            fps = %fps,
            "Loaded project"
        );

        Ok(Project {
            resolution: Resolution::new(raw.width, raw.height),
            fps,
            audio_sample_rate: raw.audio_sample_rate,
            end: TimeMs(end),
            tree,
        })
    }
}

fn insert_node(
    tree: &mut TimelineTree,
    parent: Option<NodeId>,
    value: &Value,
    path: &str,
    depth: usize,
) -> Result<NodeId, TimelineEvalError> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(TimelineEvalError::NestingTooDeep {
            max_depth: MAX_NESTING_DEPTH,
            path: path.to_owned(),
        });
    }

    let object = value
        .as_object()
        .ok_or_else(|| invalid(path, "timeline entry must be an object"))?;
    let type_name = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(path, "missing \"type\""))?;

    let kind = if type_name == "container" {
        NodeKind::Container {
            children: Vec::new(),
        }
    } else {
        let media = MediaKind::from_type_name(type_name).ok_or_else(|| {
            TimelineEvalError::UnknownNodeType {
                type_name: type_name.to_owned(),
                path: path.to_owned(),
            }
        })?;
        NodeKind::Leaf(parse_leaf(media, object, path)?)
    };

    let node = TimelineNode {
        start: time_field(object, "start")?,
        duration: time_field(object, "duration")?,
        end: time_field(object, "end")?,
        disabled: object
            .get("disabled")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        kind,
    };
    let is_container = node.is_container();

    let id = match parent {
        Some(parent) => tree.add_child(parent, node)?,
        None => tree.add_root(node),
    };

    if is_container {
        if let Some(children) = object.get("childrenTimeline") {
            let children = children
                .as_array()
                .ok_or_else(|| invalid(path, "\"childrenTimeline\" must be an array"))?;
            for (i, child) in children.iter().enumerate() {
                let child_path = format!("{path}.childrenTimeline[{i}]");
                insert_node(tree, Some(id), child, &child_path, depth + 1)?;
            }
        }
    }
    Ok(id)
}

fn parse_leaf(
    kind: MediaKind,
    object: &Map<String, Value>,
    path: &str,
) -> Result<LeafNode, TimelineEvalError> {
    let source = match object.get("source") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(SourceId::new(s.as_str())),
        Some(_) => return Err(invalid(path, "\"source\" must be a string")),
    };

    let audio_source = match object.get("audioSource") {
        None => AudioSource::Inherit,
        Some(Value::Null) => AudioSource::Muted,
        Some(Value::String(s)) => AudioSource::Path(s.clone()),
        Some(_) => return Err(invalid(path, "\"audioSource\" must be a string or null")),
    };

    if kind.has_video() && source.is_none() {
        return Err(invalid(path, "video node requires a \"source\""));
    }

    let media_start = time_field(object, "videoStart")?.unwrap_or(0.0);

    let props = object
        .iter()
        .filter(|(key, _)| !ENGINE_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(LeafNode {
        kind,
        source,
        audio_source,
        media_start,
        props,
    })
}

fn time_field(object: &Map<String, Value>, key: &str) -> Result<Option<f64>, TimelineEvalError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let time: TimeValue = serde_json::from_value(value.clone()).map_err(|_| {
                TimelineEvalError::InvalidTime {
                    value: value.to_string(),
                    reason: format!("\"{key}\" must be a number or time string"),
                }
            })?;
            parse_time(&time).map(Some)
        }
    }
}

fn invalid(path: &str, reason: &str) -> TimelineEvalError {
    TimelineEvalError::InvalidProject {
        reason: format!("{path}: {reason}"),
    }
}
