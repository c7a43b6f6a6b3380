//! Output side of the export loop.
//!
//! The engine does not encode; it hands each composed frame and its audio
//! span to a [`MediaMuxer`]. [`OrderedMuxer`] wraps any muxer and rejects
//! out-of-order video timestamps or writes after finalization, which is the
//! contract every real encoder backend relies on.

use std::sync::Arc;

use cl_audio::AudioBuffer;
use cl_common::TimeMs;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::MuxError;

/// Sink for composed video frames and mixed audio.
pub trait MediaMuxer: Send {
    /// Append one RGBA frame presented at `timestamp` for `duration`.
    fn add_video_frame(
        &mut self,
        pixels: &[u8],
        timestamp: TimeMs,
        duration: TimeMs,
    ) -> Result<(), MuxError>;

    /// Append the audio covering the most recent video frame.
    fn add_audio_buffer(&mut self, samples: &AudioBuffer) -> Result<(), MuxError>;

    /// Flush and close the output.
    fn finalize(&mut self) -> Result<(), MuxError>;
}

impl<M: MediaMuxer + ?Sized> MediaMuxer for Box<M> {
    fn add_video_frame(
        &mut self,
        pixels: &[u8],
        timestamp: TimeMs,
        duration: TimeMs,
    ) -> Result<(), MuxError> {
        (**self).add_video_frame(pixels, timestamp, duration)
    }

    fn add_audio_buffer(&mut self, samples: &AudioBuffer) -> Result<(), MuxError> {
        (**self).add_audio_buffer(samples)
    }

    fn finalize(&mut self) -> Result<(), MuxError> {
        (**self).finalize()
    }
}

// ---- Ordering guard ----

/// Enforces strictly increasing video timestamps and a single finalize.
pub struct OrderedMuxer<M> {
    inner: M,
    last_timestamp: Option<TimeMs>,
    finalized: bool,
}

impl<M: MediaMuxer> OrderedMuxer<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            last_timestamp: None,
            finalized: false,
        }
    }

    pub fn last_timestamp(&self) -> Option<TimeMs> {
        self.last_timestamp
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn into_inner(self) -> M {
        self.inner
    }
}

impl<M: MediaMuxer> MediaMuxer for OrderedMuxer<M> {
    fn add_video_frame(
        &mut self,
        pixels: &[u8],
        timestamp: TimeMs,
        duration: TimeMs,
    ) -> Result<(), MuxError> {
        if self.finalized {
            return Err(MuxError::Finalized);
        }
        if let Some(previous) = self.last_timestamp {
            if timestamp <= previous {
                return Err(MuxError::NonMonotonic {
                    previous,
                    got: timestamp,
                });
            }
        }
        self.inner.add_video_frame(pixels, timestamp, duration)?;
        self.last_timestamp = Some(timestamp);
        Ok(())
    }

    fn add_audio_buffer(&mut self, samples: &AudioBuffer) -> Result<(), MuxError> {
        if self.finalized {
            return Err(MuxError::Finalized);
        }
        self.inner.add_audio_buffer(samples)
    }

    fn finalize(&mut self) -> Result<(), MuxError> {
        if self.finalized {
            return Err(MuxError::Finalized);
        }
        self.inner.finalize()?;
        self.finalized = true;
        Ok(())
    }
}

// ---- In-memory recording ----

/// One video frame as recorded by [`MemoryMuxer`].
#[derive(Clone, Debug, PartialEq)]
pub struct MuxedFrame {
    pub timestamp: TimeMs,
    pub duration: TimeMs,
    pub pixels: Vec<u8>,
}

/// Everything a [`MemoryMuxer`] received.
#[derive(Clone, Debug, Default)]
pub struct MuxRecording {
    pub frames: Vec<MuxedFrame>,
    pub audio: Vec<AudioBuffer>,
    pub finalized: bool,
}

impl MuxRecording {
    /// Total audio frames across all buffers.
    pub fn audio_frames(&self) -> usize {
        self.audio.iter().map(AudioBuffer::frames).sum()
    }
}

/// Muxer that keeps its output in memory.
///
/// Clones share one recording, so a caller can keep a handle while the
/// export job owns the muxer.
#[derive(Clone, Debug, Default)]
pub struct MemoryMuxer {
    recording: Arc<Mutex<MuxRecording>>,
}

impl MemoryMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of what has been written so far.
    pub fn recording(&self) -> MuxRecording {
        self.recording.lock().clone()
    }
}

impl MediaMuxer for MemoryMuxer {
    fn add_video_frame(
        &mut self,
        pixels: &[u8],
        timestamp: TimeMs,
        duration: TimeMs,
    ) -> Result<(), MuxError> {
        if pixels.is_empty() {
            return Err(MuxError::InvalidFrame("empty pixel buffer".to_string()));
        }
        self.recording.lock().frames.push(MuxedFrame {
            timestamp,
            duration,
            pixels: pixels.to_vec(),
        });
        Ok(())
    }

    fn add_audio_buffer(&mut self, samples: &AudioBuffer) -> Result<(), MuxError> {
        self.recording.lock().audio.push(samples.clone());
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), MuxError> {
        let mut recording = self.recording.lock();
        recording.finalized = true;
        debug!(
            frames = recording.frames.len(),
            audio_frames = recording.audio_frames(),
            "Memory muxer finalized"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixels() -> Vec<u8> {
        vec![0u8; 4]
    }

    // ── OrderedMuxer ──

    #[test]
    fn accepts_increasing_timestamps() {
        let memory = MemoryMuxer::new();
        let mut muxer = OrderedMuxer::new(memory.clone());
        for i in 0..3 {
            muxer
                .add_video_frame(&pixels(), TimeMs(i as f64 * 100.0), TimeMs(100.0))
                .unwrap();
        }
        assert_eq!(muxer.last_timestamp(), Some(TimeMs(200.0)));
        assert_eq!(memory.recording().frames.len(), 3);
    }

    #[test]
    fn rejects_repeated_timestamp() {
        let mut muxer = OrderedMuxer::new(MemoryMuxer::new());
        muxer
            .add_video_frame(&pixels(), TimeMs(100.0), TimeMs(100.0))
            .unwrap();
        let err = muxer
            .add_video_frame(&pixels(), TimeMs(100.0), TimeMs(100.0))
            .unwrap_err();
        assert!(matches!(err, MuxError::NonMonotonic { .. }));
    }

    #[test]
    fn rejects_backwards_timestamp() {
        let mut muxer = OrderedMuxer::new(MemoryMuxer::new());
        muxer
            .add_video_frame(&pixels(), TimeMs(200.0), TimeMs(100.0))
            .unwrap();
        assert!(muxer
            .add_video_frame(&pixels(), TimeMs(100.0), TimeMs(100.0))
            .is_err());
        // The rejected frame does not move the watermark.
        assert_eq!(muxer.last_timestamp(), Some(TimeMs(200.0)));
    }

    #[test]
    fn rejects_writes_after_finalize() {
        let memory = MemoryMuxer::new();
        let mut muxer = OrderedMuxer::new(memory.clone());
        muxer.finalize().unwrap();
        assert!(muxer.is_finalized());
        assert!(memory.recording().finalized);
        assert!(matches!(
            muxer.add_video_frame(&pixels(), TimeMs(0.0), TimeMs(1.0)),
            Err(MuxError::Finalized)
        ));
        assert!(matches!(
            muxer.add_audio_buffer(&AudioBuffer::silent(1, 1000, 1)),
            Err(MuxError::Finalized)
        ));
        assert!(matches!(muxer.finalize(), Err(MuxError::Finalized)));
    }

    // ── MemoryMuxer ──

    #[test]
    fn memory_muxer_counts_audio() {
        let mut muxer = MemoryMuxer::new();
        muxer
            .add_audio_buffer(&AudioBuffer::silent(480, 48_000, 2))
            .unwrap();
        muxer
            .add_audio_buffer(&AudioBuffer::silent(480, 48_000, 2))
            .unwrap();
        assert_eq!(muxer.recording().audio_frames(), 960);
    }

    #[test]
    fn memory_muxer_rejects_empty_frame() {
        let mut muxer = MemoryMuxer::new();
        assert!(matches!(
            muxer.add_video_frame(&[], TimeMs::ZERO, TimeMs(1.0)),
            Err(MuxError::InvalidFrame(_))
        ));
    }
}
