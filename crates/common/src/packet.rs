//! Encoded samples and decoded frames — the data flowing demuxer → decoder → compositor.

use std::sync::Arc;

use crate::types::{Resolution, TimeMs};

/// One encoded video sample as stored in the container.
#[derive(Clone, Debug)]
pub struct EncodedSample {
    /// Index in decode order.
    pub index: usize,
    /// Compressed payload.
    pub data: Vec<u8>,
    /// Presentation timestamp.
    pub timestamp: TimeMs,
    /// Presentation duration.
    pub duration: TimeMs,
    /// Whether decoding can start at this sample (sync sample / IDR).
    pub is_key: bool,
}

/// A decoded video frame in host memory.
///
/// Pixel data is reference counted so the cache can hand the same frame to
/// several consumers without copying.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub timestamp: TimeMs,
    pub duration: TimeMs,
    pub resolution: Resolution,
    /// RGBA8 pixels, row-major.
    pub data: Arc<Vec<u8>>,
}

impl VideoFrame {
    pub fn end(&self) -> TimeMs {
        self.timestamp + self.duration
    }

    /// Whether `t` falls in `[timestamp, timestamp + duration)`.
    pub fn contains(&self, t: TimeMs) -> bool {
        t >= self.timestamp && t < self.end()
    }
}

/// Primary video track description extracted when a container is opened.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoTrackInfo {
    pub track_id: u32,
    /// Codec name as reported by the container (`"h264"`, `"raw"`, ...).
    pub codec: String,
    pub resolution: Resolution,
    pub duration: TimeMs,
    pub sample_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_window_is_half_open() {
        let frame = VideoFrame {
            timestamp: TimeMs(100.0),
            duration: TimeMs(40.0),
            resolution: Resolution::new(2, 2),
            data: Arc::new(vec![0; 16]),
        };
        assert!(frame.contains(TimeMs(100.0)));
        assert!(frame.contains(TimeMs(139.9)));
        assert!(!frame.contains(TimeMs(140.0)));
        assert!(!frame.contains(TimeMs(99.9)));
        assert_eq!(frame.end(), TimeMs(140.0));
    }
}
