//! Audio error types (thiserror-based).

use cl_common::AssetError;
use cl_timeline_eval::TimelineEvalError;
use thiserror::Error;

/// Audio subsystem error type.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The source could not be read from the asset store.
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// The audio format/codec is not supported.
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Decoding error from Symphonia.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Seeking to a specific time failed.
    #[error("Seek error at {time}s: {reason}")]
    Seek { time: f64, reason: String },

    /// No audio track found in the container.
    #[error("No audio track found in file")]
    NoAudioTrack,

    /// A newer request superseded this one.
    #[error("Audio request cancelled")]
    Cancelled,

    /// The timeline could not be flattened into segments.
    #[error(transparent)]
    Timeline(#[from] TimelineEvalError),

    /// Audio output device error.
    #[error("Audio output error: {0}")]
    Output(String),

    /// Audio output stream build error.
    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    /// Audio output stream play error.
    #[error("Failed to play audio stream: {0}")]
    StreamPlay(String),
}

impl AudioError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
