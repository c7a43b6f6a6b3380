//! Error types for muxing, composition and the export loop.

use cl_audio::AudioError;
use cl_common::TimeMs;
use cl_timeline_eval::TimelineEvalError;
use thiserror::Error;

/// Errors from a [`MediaMuxer`](crate::muxer::MediaMuxer).
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Non-monotonic video timestamp: {got} after {previous}")]
    NonMonotonic { previous: TimeMs, got: TimeMs },

    #[error("Muxer already finalized")]
    Finalized,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a [`SceneCompositor`](crate::compositor::SceneCompositor).
#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("Invalid output resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },

    #[error("Composition failed at {time}: {reason}")]
    Failed { time: TimeMs, reason: String },
}

/// Errors that end an export.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Invalid export config: {0}")]
    InvalidConfig(String),

    #[error("Export cancelled")]
    Cancelled,

    #[error("Export initialization failed: {0}")]
    InitFailed(String),

    #[error("Export thread panicked")]
    ThreadPanicked,

    #[error(transparent)]
    Timeline(#[from] TimelineEvalError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Compositor(#[from] CompositorError),

    #[error(transparent)]
    Mux(#[from] MuxError),
}

impl ExportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
