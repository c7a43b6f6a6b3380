//! Live playback destinations.
//!
//! An [`AudioSink`] plays one mixed buffer at a time. Starting a new buffer
//! replaces whatever was playing; [`stop`](AudioSink::stop) silences it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cl_common::TimeMs;
use parking_lot::Mutex;

use crate::error::AudioError;
use crate::mixer::AudioBuffer;

/// Output for the live playback graph.
pub trait AudioSink: Send + Sync {
    /// Start playing `buffer`, whose first frame is timeline time `at`.
    fn start(&self, at: TimeMs, buffer: AudioBuffer) -> Result<(), AudioError>;

    /// Stop playback. Stopping an idle sink is a no-op.
    fn stop(&self);
}

/// Sink that discards audio.
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn start(&self, _at: TimeMs, _buffer: AudioBuffer) -> Result<(), AudioError> {
        Ok(())
    }

    fn stop(&self) {}
}

/// Sink that records what it was asked to play.
#[derive(Debug, Default)]
pub struct MemorySink {
    started: Mutex<Vec<(TimeMs, AudioBuffer)>>,
    stops: AtomicUsize,
    playing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every started buffer with its timeline position, oldest first.
    pub fn started(&self) -> Vec<(TimeMs, AudioBuffer)> {
        self.started.lock().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl AudioSink for MemorySink {
    fn start(&self, at: TimeMs, buffer: AudioBuffer) -> Result<(), AudioError> {
        self.started.lock().push((at, buffer));
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_buffers() {
        let sink = MemorySink::new();
        sink.start(TimeMs(500.0), AudioBuffer::silent(4, 1000, 2)).unwrap();
        assert!(sink.is_playing());
        let started = sink.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].0, TimeMs(500.0));
        assert_eq!(started[0].1.frames(), 4);

        sink.stop();
        assert!(!sink.is_playing());
        assert_eq!(sink.stop_count(), 1);
    }

    #[test]
    fn null_sink_accepts_anything() {
        let sink = NullSink;
        assert!(sink.start(TimeMs::ZERO, AudioBuffer::silent(1, 1, 1)).is_ok());
        sink.stop();
    }
}
