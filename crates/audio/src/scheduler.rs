//! Audio timeline scheduler.
//!
//! ```text
//!   build_timeline(tree) ──► [AudioSegment]            (flattened once per rebuild)
//!                                  │
//!   schedule(start, dur) ──► get_overlapping ──► decode each segment (scoped threads)
//!                                  │                     │ SegmentDecoder per SegmentId
//!                                  ▼                     ▼
//!                           [ScheduleItem { buffer, delay, slot }]
//!                                  │
//!                  ┌───────────────┴───────────────┐
//!           render_offline                       play
//!        (one mixed AudioBuffer)        (mixed buffer ─► AudioSink)
//! ```
//!
//! For a query `[start, start + duration)` and a segment, the local source
//! time at the window start is `start - seg.start + seg.audio_start`. Audio
//! is decoded only from inside the segment's slot, and each buffer's delay
//! relative to the window start is `timestamp * 1000 - local`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cl_common::{AudioConfig, CancelToken, TimeMs};
use cl_timeline_eval::TimelineTree;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::decoder::{AudioDecoderFactory, DecodedAudio, SegmentDecoder};
use crate::error::AudioError;
use crate::mixer::{AudioBuffer, AudioMixer};
use crate::segment::{build_segments, AudioSegment, SegmentId};
use crate::sink::AudioSink;

/// One decoded buffer placed relative to a query window.
#[derive(Clone, Debug)]
pub struct ScheduleItem {
    pub buffer: DecodedAudio,
    /// Start of the buffer relative to the window start (ms). Negative
    /// values mean the head of the buffer lies before the window.
    pub delay: f64,
    pub segment: SegmentId,
    /// The segment's slot inside the window, relative to the window start (ms).
    pub slot_start: f64,
    pub slot_end: f64,
}

struct DecoderEntry {
    decoder: Mutex<Box<dyn SegmentDecoder>>,
    /// Token of the latest request on this decoder.
    inflight: Mutex<Option<CancelToken>>,
}

struct Playback {
    token: CancelToken,
    sink: Arc<dyn AudioSink>,
}

/// Flattened audio of a timeline, with cached decoders and one live playback.
pub struct AudioTimeline {
    factory: Arc<dyn AudioDecoderFactory>,
    mixer: AudioMixer,
    segments: RwLock<Vec<AudioSegment>>,
    decoders: Mutex<HashMap<SegmentId, Arc<DecoderEntry>>>,
    playback: Mutex<Option<Playback>>,
}

impl std::fmt::Debug for AudioTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioTimeline")
            .field("segments", &self.segments.read().len())
            .field("decoders", &self.decoders.lock().len())
            .field("mixer", &self.mixer)
            .finish()
    }
}

impl AudioTimeline {
    pub fn new(factory: Arc<dyn AudioDecoderFactory>, config: &AudioConfig) -> Self {
        Self {
            factory,
            mixer: AudioMixer::new(config.sample_rate, config.channels),
            segments: RwLock::new(Vec::new()),
            decoders: Mutex::new(HashMap::new()),
            playback: Mutex::new(None),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.mixer.channels
    }

    /// Re-flatten `tree` into segments. Decoders of segments that no longer
    /// exist are dropped. Returns the number of segments.
    pub fn build_timeline(&self, tree: &TimelineTree) -> Result<usize, AudioError> {
        let segments = build_segments(tree)?;
        let live: HashSet<&SegmentId> = segments.iter().map(|s| &s.id).collect();

        let evicted = {
            let mut decoders = self.decoders.lock();
            let before = decoders.len();
            decoders.retain(|id, _| live.contains(id));
            before - decoders.len()
        };

        let count = segments.len();
        let disabled = segments.iter().filter(|s| s.disabled).count();
        *self.segments.write() = segments;
        info!(segments = count, disabled, evicted, "Audio timeline rebuilt");
        Ok(count)
    }

    pub fn segments(&self) -> Vec<AudioSegment> {
        self.segments.read().clone()
    }

    /// Enabled segments overlapping `[start, start + duration)`.
    pub fn get_overlapping(&self, start: f64, duration: f64) -> Vec<AudioSegment> {
        self.segments
            .read()
            .iter()
            .filter(|s| !s.disabled && s.overlaps(start, duration))
            .cloned()
            .collect()
    }

    /// Decode every overlapping segment and place its buffers in the window.
    ///
    /// Failing segments are logged and skipped. Returns
    /// [`AudioError::Cancelled`] if `cancel` fires before completion.
    pub fn schedule(
        &self,
        start: f64,
        duration: f64,
        cancel: &CancelToken,
    ) -> Result<Vec<ScheduleItem>, AudioError> {
        let segments = self.get_overlapping(start, duration);
        debug!(start, duration, segments = segments.len(), "Scheduling audio window");

        let results: Vec<(SegmentId, Result<Vec<ScheduleItem>, AudioError>)> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = segments
                    .iter()
                    .map(|seg| {
                        let handle = scope
                            .spawn(move || self.schedule_segment(seg, start, duration, cancel));
                        (seg.id.clone(), handle)
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(id, handle)| {
                        let result = handle.join().unwrap_or_else(|_| {
                            Err(AudioError::Decode("segment decode panicked".to_string()))
                        });
                        (id, result)
                    })
                    .collect()
            });

        if cancel.is_cancelled() {
            return Err(AudioError::Cancelled);
        }

        let mut items = Vec::new();
        for (id, result) in results {
            match result {
                Ok(mut placed) => items.append(&mut placed),
                Err(e) if e.is_cancelled() => {
                    debug!(segment = %id, "Segment decode superseded");
                }
                Err(e) => {
                    warn!(segment = %id, error = %e, "Skipping audio segment");
                }
            }
        }
        Ok(items)
    }

    fn schedule_segment(
        &self,
        seg: &AudioSegment,
        start: f64,
        duration: f64,
        cancel: &CancelToken,
    ) -> Result<Vec<ScheduleItem>, AudioError> {
        let local = start - seg.start + seg.audio_start;
        let from = (start - seg.start).max(0.0) + seg.audio_start;
        let until = (local + duration).min(seg.audio_start + seg.duration);
        if until <= from {
            return Ok(Vec::new());
        }

        let entry = self.decoder_for(seg)?;
        let token = cancel.child();
        if let Some(previous) = entry.inflight.lock().replace(token.clone()) {
            previous.cancel();
        }

        let buffers = entry.decoder.lock().decode_range(from, until, &token)?;

        let slot_start = (seg.start - start).max(0.0);
        let slot_end = (seg.end() - start).min(duration);
        Ok(buffers
            .into_iter()
            .map(|buffer| ScheduleItem {
                delay: buffer.timestamp * 1000.0 - local,
                buffer,
                segment: seg.id.clone(),
                slot_start,
                slot_end,
            })
            .collect())
    }

    /// The cached decoder of `seg`, created on first use.
    fn decoder_for(&self, seg: &AudioSegment) -> Result<Arc<DecoderEntry>, AudioError> {
        if let Some(entry) = self.decoders.lock().get(&seg.id) {
            return Ok(Arc::clone(entry));
        }

        let decoder = self.factory.create(&seg.source)?;
        debug!(segment = %seg.id, "Created segment decoder");
        let mut decoders = self.decoders.lock();
        let entry = decoders.entry(seg.id.clone()).or_insert_with(|| {
            Arc::new(DecoderEntry {
                decoder: Mutex::new(decoder),
                inflight: Mutex::new(None),
            })
        });
        Ok(Arc::clone(entry))
    }

    /// Number of cached segment decoders.
    pub fn decoder_count(&self) -> usize {
        self.decoders.lock().len()
    }

    /// Render `[start, start + duration)` into one buffer of
    /// `ceil(duration / 1000 * sample_rate)` frames.
    pub fn render_offline(&self, start: f64, duration: f64) -> Result<AudioBuffer, AudioError> {
        let items = self.schedule(start, duration, &CancelToken::new())?;
        Ok(self.mixer.render(&items, self.mixer.frames_for(duration)))
    }

    /// Replace the live playback with `[start, start + duration)` on `sink`.
    ///
    /// Returns `Ok(false)` when a newer `play` or a `stop` superseded this
    /// call before it started.
    pub fn play(
        &self,
        start: f64,
        duration: f64,
        sink: Arc<dyn AudioSink>,
    ) -> Result<bool, AudioError> {
        let token = CancelToken::new();
        // Tear down and replace under one lock so concurrent calls cannot
        // both keep a live token.
        {
            let mut playback = self.playback.lock();
            let current = Playback {
                token: token.clone(),
                sink: Arc::clone(&sink),
            };
            if let Some(previous) = playback.replace(current) {
                previous.token.cancel();
                previous.sink.stop();
            }
        }

        let items = match self.schedule(start, duration, &token) {
            Ok(items) => items,
            Err(e) if e.is_cancelled() => return Ok(false),
            Err(e) => return Err(e),
        };
        let buffer = self.mixer.render(&items, self.mixer.frames_for(duration));

        // Checked under the playback lock so a concurrent stop() either sees
        // the started graph or prevents it from starting.
        let _playback = self.playback.lock();
        if token.is_cancelled() {
            debug!(start, "Playback superseded before start");
            return Ok(false);
        }
        sink.start(TimeMs(start), buffer)?;
        debug!(start, duration, items = items.len(), "Playback started");
        Ok(true)
    }

    /// Cancel the live playback, if any.
    pub fn stop(&self) {
        if let Some(playback) = self.playback.lock().take() {
            playback.token.cancel();
            playback.sink.stop();
        }
    }
}
