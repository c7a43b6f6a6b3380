//! Frame decoder abstraction and the raw RGBA decoder.
//!
//! A [`FrameDecoder`] turns encoded samples into [`VideoFrame`]s. It is fed
//! samples in decode order, starting at a sync sample after every
//! [`reset`](FrameDecoder::reset). Output may lag input for codecs with
//! frame reordering; [`flush`](FrameDecoder::flush) drains what is left.

use std::sync::Arc;

use cl_common::{EncodedSample, Resolution, VideoFrame, VideoTrackInfo};

use crate::error::CodecError;

/// Codec backend used by a decode session.
pub trait FrameDecoder: Send {
    /// Prepare for the given track. Called once before any decode.
    fn configure(&mut self, track: &VideoTrackInfo) -> Result<(), CodecError>;

    /// Feed one sample; returns a frame when one becomes available.
    fn decode(&mut self, sample: &EncodedSample) -> Result<Option<VideoFrame>, CodecError>;

    /// Drain buffered frames. The next sample fed must be a sync sample.
    fn flush(&mut self) -> Result<Vec<VideoFrame>, CodecError>;

    /// Drop all decoder state before replaying from a sync sample.
    fn reset(&mut self);
}

/// Codec name of uncompressed RGBA tracks.
pub const RAW_CODEC: &str = "raw";

/// Decoder for uncompressed RGBA8 samples.
///
/// Every sample must carry exactly one full frame.
#[derive(Debug, Default)]
pub struct RawFrameDecoder {
    resolution: Option<Resolution>,
}

impl RawFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameDecoder for RawFrameDecoder {
    fn configure(&mut self, track: &VideoTrackInfo) -> Result<(), CodecError> {
        if track.codec != RAW_CODEC {
            return Err(CodecError::Unsupported(track.codec.clone()));
        }
        self.resolution = Some(track.resolution);
        Ok(())
    }

    fn decode(&mut self, sample: &EncodedSample) -> Result<Option<VideoFrame>, CodecError> {
        let resolution = self.resolution.ok_or(CodecError::NotConfigured)?;
        let expected = resolution.rgba_byte_size();
        if sample.data.len() != expected {
            return Err(CodecError::Corrupt {
                index: sample.index,
                reason: format!("expected {expected} bytes, got {}", sample.data.len()),
            });
        }
        Ok(Some(VideoFrame {
            timestamp: sample.timestamp,
            duration: sample.duration,
            resolution,
            data: Arc::new(sample.data.clone()),
        }))
    }

    fn flush(&mut self) -> Result<Vec<VideoFrame>, CodecError> {
        Ok(Vec::new())
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_common::TimeMs;

    fn track(codec: &str) -> VideoTrackInfo {
        VideoTrackInfo {
            track_id: 1,
            codec: codec.to_owned(),
            resolution: Resolution::new(2, 1),
            duration: TimeMs(100.0),
            sample_count: 1,
        }
    }

    fn sample(len: usize) -> EncodedSample {
        EncodedSample {
            index: 0,
            data: vec![7; len],
            timestamp: TimeMs(0.0),
            duration: TimeMs(100.0),
            is_key: true,
        }
    }

    #[test]
    fn decodes_raw_frames() {
        let mut decoder = RawFrameDecoder::new();
        decoder.configure(&track(RAW_CODEC)).unwrap();
        let frame = decoder.decode(&sample(8)).unwrap().unwrap();
        assert_eq!(frame.resolution, Resolution::new(2, 1));
        assert_eq!(frame.data.as_slice(), &[7; 8]);
        assert!(decoder.flush().unwrap().is_empty());
    }

    #[test]
    fn rejects_wrong_sizes_and_codecs() {
        let mut decoder = RawFrameDecoder::new();
        assert!(matches!(
            decoder.decode(&sample(8)),
            Err(CodecError::NotConfigured)
        ));
        assert!(matches!(
            decoder.configure(&track("h264")),
            Err(CodecError::Unsupported(_))
        ));
        decoder.configure(&track(RAW_CODEC)).unwrap();
        assert!(matches!(
            decoder.decode(&sample(3)),
            Err(CodecError::Corrupt { .. })
        ));
    }
}
