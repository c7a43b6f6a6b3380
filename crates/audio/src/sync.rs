//! Playback position of the live audio output.
//!
//! The [`AudioClock`] counts frames consumed by the output device and turns
//! them into a timeline position. Preview uses it as the master clock while
//! audio is playing: video follows whatever time the clock reports.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cl_common::TimeMs;

/// Audio-driven timeline clock.
///
/// Clones share the same counters, so the output callback can advance the
/// clock while the preview thread reads it.
#[derive(Clone, Debug)]
pub struct AudioClock {
    sample_rate: u32,
    /// Frames played since the last [`restart`](Self::restart).
    frames_played: Arc<AtomicU64>,
    /// Timeline position of the first frame, as f64 bits.
    base_bits: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_played: Arc::new(AtomicU64::new(0)),
            base_bits: Arc::new(AtomicU64::new(0.0f64.to_bits())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Timeline position of the frame currently playing.
    pub fn current_time(&self) -> TimeMs {
        let frames = self.frames_played.load(Ordering::Relaxed);
        let base = f64::from_bits(self.base_bits.load(Ordering::Relaxed));
        if self.sample_rate == 0 {
            return TimeMs(base);
        }
        TimeMs(base + frames as f64 * 1000.0 / self.sample_rate as f64)
    }

    /// Rebase the clock at `at` with zero frames played and mark it running.
    pub fn restart(&self, at: TimeMs) {
        self.base_bits
            .store(at.as_millis().to_bits(), Ordering::Relaxed);
        self.frames_played.store(0, Ordering::Relaxed);
        self.running.store(true, Ordering::Relaxed);
    }

    /// Called from the output callback after each buffer is consumed.
    pub fn advance(&self, frames: u64) {
        self.frames_played.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let clock = AudioClock::new(48000);
        assert_eq!(clock.current_time(), TimeMs::ZERO);
        assert!(!clock.is_running());
    }

    #[test]
    fn advances_with_frames() {
        let clock = AudioClock::new(48000);
        clock.advance(24000);
        assert!((clock.current_time().as_millis() - 500.0).abs() < 1e-9);
        clock.advance(24000);
        assert_eq!(clock.frames_played(), 48000);
    }

    #[test]
    fn restart_rebases() {
        let clock = AudioClock::new(44100);
        clock.advance(44100);
        clock.restart(TimeMs(10_000.0));
        assert!(clock.is_running());
        assert_eq!(clock.current_time(), TimeMs(10_000.0));
        clock.advance(44100);
        assert!((clock.current_time().as_millis() - 11_000.0).abs() < 1e-9);
        clock.stop();
        assert!(!clock.is_running());
    }

    #[test]
    fn clones_share_state() {
        let clock = AudioClock::new(1000);
        let callback_side = clock.clone();
        callback_side.advance(250);
        assert_eq!(clock.current_time(), TimeMs(250.0));
    }
}
