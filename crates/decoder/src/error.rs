//! Frame decoder errors.

use thiserror::Error;

/// Errors raised by a [`FrameDecoder`](crate::FrameDecoder).
///
/// The cache wraps these into `DecodeError::Failed` together with the
/// source that produced them.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported codec: {0}")]
    Unsupported(String),

    #[error("Corrupt sample {index}: {reason}")]
    Corrupt { index: usize, reason: String },

    #[error("Decoder used before configure()")]
    NotConfigured,
}
