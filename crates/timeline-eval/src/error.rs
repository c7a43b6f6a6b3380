//! Error types for timeline evaluation.

use thiserror::Error;

use crate::types::NodeId;

/// Errors that can occur while building or evaluating a timeline.
///
/// All of these are fatal for the current pass: the project has to be fixed
/// upstream before it can be evaluated.
#[derive(Error, Debug)]
pub enum TimelineEvalError {
    #[error("Malformed timing on node {node}: {reason}")]
    MalformedTiming { node: NodeId, reason: String },

    #[error("Unknown node type {type_name:?} at {path}")]
    UnknownNodeType { type_name: String, path: String },

    #[error("Invalid time value {value:?}: {reason}")]
    InvalidTime { value: String, reason: String },

    #[error("Container nesting too deep (max {max_depth}) at {path}")]
    NestingTooDeep { max_depth: usize, path: String },

    #[error("Node {0} is not a container")]
    NotAContainer(NodeId),

    #[error("Node {0} does not exist")]
    NodeNotFound(NodeId),

    #[error("Invalid project: {reason}")]
    InvalidProject { reason: String },

    #[error("Failed to parse project: {0}")]
    Parse(#[from] serde_json::Error),
}
