//! Shared error types for the engine (thiserror-based).

use std::path::PathBuf;

use thiserror::Error;

use crate::types::SourceId;

/// Asset store errors.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Asset not found: {path}")]
    NotFound { path: String },

    #[error("Invalid asset path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Demuxer/container parsing errors.
#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("Unsupported container format: {0}")]
    UnsupportedContainer(String),

    #[error("Invalid container structure: {reason}")]
    InvalidStructure { reason: String },

    #[error("No video track found")]
    NoVideoTrack,

    #[error("Sample {index} out of range (track has {count} samples)")]
    SampleOutOfRange { index: usize, count: usize },

    #[error("Track has no samples")]
    EmptyTrack,
}

/// Errors surfaced by a frame request.
///
/// `Cancelled` is benign: the request was superseded by a later one on the
/// same decoder and its result must be dropped without reporting.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Decode cancelled")]
    Cancelled,

    #[error("Decode failed for {source_id}: {reason}")]
    Failed { source_id: SourceId, reason: String },
}

impl DecodeError {
    pub fn failed(source_id: &SourceId, reason: impl ToString) -> Self {
        Self::Failed {
            source_id: source_id.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_carries_source() {
        let err = DecodeError::failed(&SourceId::new("clip.mp4"), "corrupt sample 4");
        assert!(!err.is_cancelled());
        assert_eq!(
            err.to_string(),
            "Decode failed for clip.mp4: corrupt sample 4"
        );
    }

    #[test]
    fn cancelled_is_benign() {
        assert!(DecodeError::Cancelled.is_cancelled());
    }
}
