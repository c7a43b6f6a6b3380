//! Interactive preview: wall-clock driven, throttled, never blocking.
//!
//! Time updates from scrubbing or playback arrive far faster than frames can
//! be decoded. A [`Throttle`] lets the first update of a burst through at
//! once and holds the latest of the rest until the window ends. Each applied
//! update resolves the timeline and fires one background request per active
//! video source, covering every node that shows it; a node keeps showing its
//! previous frame until a newer request succeeds.
//!
//! ```text
//! set_time(t) ──► Throttle ──► seek(t) ──► resolve ──► spawn batch per source ...
//! tick()      ──► Throttle ──┘                             │
//!                                                          ▼
//!                                             displayed[node] (newest wins)
//! ```
//!
//! Preview has no muxer and never waits on one; [`PreviewSession::settle`]
//! exists for callers that need a stable picture (tests, thumbnails).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cl_audio::{AudioSink, AudioTimeline};
use cl_common::{DecodeError, PreviewConfig, SourceId, TimeMs, VideoFrame};
use cl_decoder::{FrameBatch, VideoCacheManager, VideoFrameCache};
use cl_timeline_eval::{media_time, resolve, ActivationSet, NodeId, TimelineTree};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::error::ExportError;
use crate::settle::SettleTracker;

// ---- Throttle ----

/// Leading-edge throttle with a trailing emit of the latest value.
#[derive(Debug)]
pub struct Throttle<T> {
    window: Duration,
    last_emit: Option<Instant>,
    last_value: Option<T>,
    pending: Option<T>,
}

impl<T: Clone + PartialEq> Throttle<T> {
    /// Throttle emitting at most once per `window`, plus one trailing value.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emit: None,
            last_value: None,
            pending: None,
        }
    }

    /// Offer `value` at `now`. Outside the window it is returned at once;
    /// inside it replaces the held trailing value.
    pub fn update(&mut self, value: T, now: Instant) -> Option<T> {
        match self.last_emit {
            Some(at) if now.saturating_duration_since(at) < self.window => {
                self.pending = Some(value);
                None
            }
            _ => {
                self.pending = None;
                Some(self.emit(value, now))
            }
        }
    }

    /// The trailing value, once the window has passed and only if it differs
    /// from the last emitted one.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let at = self.last_emit?;
        if now.saturating_duration_since(at) < self.window {
            return None;
        }
        let value = self.pending.take()?;
        if self.last_value.as_ref() == Some(&value) {
            return None;
        }
        Some(self.emit(value, now))
    }

    /// When [`poll`](Self::poll) should next be called, if a value is held.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        self.last_emit.map(|at| at + self.window)
    }

    /// Coalescing window.
    pub fn window(&self) -> Duration {
        self.window
    }

    fn emit(&mut self, value: T, now: Instant) -> T {
        self.last_emit = Some(now);
        self.last_value = Some(value.clone());
        value
    }
}

// ---- Preview session ----

#[derive(Debug)]
struct Displayed {
    /// Sequence number of the update that requested this frame.
    seq: u64,
    frame: VideoFrame,
}

/// Live preview over one timeline.
pub struct PreviewSession {
    tree: RwLock<Arc<TimelineTree>>,
    caches: Mutex<VideoCacheManager>,
    audio: Arc<AudioTimeline>,
    sink: Arc<dyn AudioSink>,
    throttle: Mutex<Throttle<TimeMs>>,
    tracker: SettleTracker,
    displayed: Arc<Mutex<HashMap<NodeId, Displayed>>>,
    sequence: AtomicU64,
    current_time: Mutex<Option<TimeMs>>,
}

impl std::fmt::Debug for PreviewSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewSession")
            .field("current_time", &*self.current_time.lock())
            .field("in_flight", &self.tracker.in_flight())
            .field("displayed", &self.displayed.lock().len())
            .finish()
    }
}

impl PreviewSession {
    /// Builds the audio timeline for `tree`.
    pub fn new(
        tree: Arc<TimelineTree>,
        caches: VideoCacheManager,
        audio: Arc<AudioTimeline>,
        sink: Arc<dyn AudioSink>,
        config: &PreviewConfig,
    ) -> Result<Self, ExportError> {
        audio.build_timeline(&tree)?;
        Ok(Self {
            tree: RwLock::new(tree),
            caches: Mutex::new(caches),
            audio,
            sink,
            throttle: Mutex::new(Throttle::new(Duration::from_millis(config.throttle_ms))),
            tracker: SettleTracker::new(),
            displayed: Arc::new(Mutex::new(HashMap::new())),
            sequence: AtomicU64::new(0),
            current_time: Mutex::new(None),
        })
    }

    /// Swap in an edited timeline.
    ///
    /// Rebuilds audio segments, evicts frame caches of sources the new tree
    /// no longer shows and forgets displayed frames, since node ids refer to
    /// the old tree.
    pub fn set_tree(&self, tree: Arc<TimelineTree>) -> Result<(), ExportError> {
        self.audio.build_timeline(&tree)?;
        let sources = video_sources(&tree);
        let evicted = self.caches.lock().retain_sources(&sources);
        self.displayed.lock().clear();
        *self.tree.write() = tree;
        info!(sources = sources.len(), evicted, "Preview timeline replaced");
        Ok(())
    }

    /// Throttled time update. Returns the activation when the update was
    /// applied immediately.
    pub fn set_time(&self, t: TimeMs, now: Instant) -> Result<Option<ActivationSet>, ExportError> {
        let emitted = self.throttle.lock().update(t, now);
        emitted.map(|t| self.seek(t)).transpose()
    }

    /// Apply the trailing update of the last burst, if it is due.
    pub fn tick(&self, now: Instant) -> Result<Option<ActivationSet>, ExportError> {
        let emitted = self.throttle.lock().poll(now);
        emitted.map(|t| self.seek(t)).transpose()
    }

    /// When [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.throttle.lock().deadline()
    }

    /// Resolve `t` and request a frame for every active video node, without
    /// throttling. Requests run in the background, one worker per source;
    /// nodes sharing a source are served in order under one claim.
    pub fn seek(&self, t: TimeMs) -> Result<ActivationSet, ExportError> {
        let tree = self.tree.read().clone();
        let activation = resolve(&tree, t.as_millis())?;
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        *self.current_time.lock() = Some(t);

        let mut groups: Vec<(&SourceId, Vec<(NodeId, TimeMs)>)> = Vec::new();
        for entry in activation.leaves() {
            let Some(leaf) = tree.node(entry.node)?.as_leaf() else {
                continue;
            };
            let Some(source) = leaf.source.as_ref().filter(|_| leaf.kind.has_video()) else {
                continue;
            };
            let request = (entry.node, TimeMs(media_time(entry, leaf)));
            match groups.iter_mut().find(|(s, _)| *s == source) {
                Some((_, members)) => members.push(request),
                None => groups.push((source, vec![request])),
            }
        }

        let mut caches = self.caches.lock();
        let requested: usize = groups.iter().map(|(_, members)| members.len()).sum();
        for (source, members) in groups {
            let cache = caches.get_or_create(source);
            let (nodes, times): (Vec<NodeId>, Vec<TimeMs>) = members.into_iter().unzip();
            let batch = VideoFrameCache::request_batch(&cache, times);
            self.spawn_batch(nodes, batch, seq);
        }
        trace!(time = %t, seq, requested, "Preview update applied");
        Ok(activation)
    }

    fn spawn_batch(&self, nodes: Vec<NodeId>, batch: FrameBatch, seq: u64) {
        let guard = self.tracker.track();
        let displayed = Arc::clone(&self.displayed);
        let name = format!("preview-{}", batch.source_id());
        let spawned = std::thread::Builder::new().name(name).spawn(move || {
            let _guard = guard;
            let times = batch.times().to_vec();
            let results = batch.wait();
            for ((node, at), result) in nodes.into_iter().zip(times).zip(results) {
                match result {
                    Ok(frame) => {
                        let mut displayed = displayed.lock();
                        if displayed.get(&node).map_or(true, |d| d.seq <= seq) {
                            displayed.insert(node, Displayed { seq, frame });
                        }
                    }
                    Err(DecodeError::Cancelled) => {
                        trace!(node = %node, "Preview request superseded");
                    }
                    Err(e) => {
                        warn!(node = %node, media_time = %at, error = %e, "Preview frame failed, keeping previous frame");
                    }
                }
            }
        });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn preview request");
        }
    }

    /// Start audio playback of `[from, from + duration)`.
    ///
    /// Returns `Ok(false)` if a later `play` or `stop` superseded this one.
    pub fn play(&self, from: TimeMs, duration: f64) -> Result<bool, ExportError> {
        debug!(from = %from, duration, "Preview playback requested");
        Ok(self
            .audio
            .play(from.as_millis(), duration, Arc::clone(&self.sink))?)
    }

    /// Stop audio playback.
    pub fn stop(&self) {
        self.audio.stop();
    }

    /// Block until every background request has finished and every cache's
    /// prefetch is idle.
    pub fn settle(&self) {
        self.tracker.wait();
        self.caches.lock().settle_all();
    }

    /// Background requests that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight()
    }

    /// Frame currently displayed for `node`.
    pub fn frame(&self, node: NodeId) -> Option<VideoFrame> {
        self.displayed.lock().get(&node).map(|d| d.frame.clone())
    }

    /// Time of the last applied update.
    pub fn current_time(&self) -> Option<TimeMs> {
        *self.current_time.lock()
    }

    /// Number of video sources with a live frame cache.
    pub fn active_caches(&self) -> usize {
        self.caches.lock().active_count()
    }
}

impl Drop for PreviewSession {
    fn drop(&mut self) {
        self.audio.stop();
    }
}

/// Sources of every video leaf in `tree`, disabled or not.
fn video_sources(tree: &TimelineTree) -> HashSet<SourceId> {
    tree.iter()
        .filter_map(|(_, node)| node.as_leaf())
        .filter(|leaf| leaf.kind.has_video())
        .filter_map(|leaf| leaf.source.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // ── Throttle ──

    #[test]
    fn first_update_passes_immediately() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(ms(50));
        assert_eq!(throttle.update(1, t0), Some(1));
        assert_eq!(throttle.deadline(), None);
    }

    #[test]
    fn burst_keeps_only_the_latest() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(ms(50));
        assert_eq!(throttle.update(1, t0), Some(1));
        assert_eq!(throttle.update(2, t0 + ms(10)), None);
        assert_eq!(throttle.update(3, t0 + ms(20)), None);
        assert_eq!(throttle.deadline(), Some(t0 + ms(50)));

        assert_eq!(throttle.poll(t0 + ms(40)), None);
        assert_eq!(throttle.poll(t0 + ms(50)), Some(3));
        assert_eq!(throttle.poll(t0 + ms(200)), None);
    }

    #[test]
    fn trailing_value_equal_to_last_is_dropped() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(ms(50));
        throttle.update(7, t0);
        throttle.update(8, t0 + ms(5));
        throttle.update(7, t0 + ms(10));
        assert_eq!(throttle.poll(t0 + ms(60)), None);
        assert_eq!(throttle.deadline(), None);
    }

    #[test]
    fn update_after_window_is_leading_again() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(ms(50));
        throttle.update(1, t0);
        throttle.update(2, t0 + ms(10));
        // A fresh leading emit supersedes the held trailing value.
        assert_eq!(throttle.update(5, t0 + ms(70)), Some(5));
        assert_eq!(throttle.poll(t0 + ms(200)), None);
    }

    #[test]
    fn trailing_emit_restarts_window() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(ms(50));
        throttle.update(1, t0);
        throttle.update(2, t0 + ms(10));
        assert_eq!(throttle.poll(t0 + ms(55)), Some(2));
        assert_eq!(throttle.update(3, t0 + ms(60)), None);
        assert_eq!(throttle.deadline(), Some(t0 + ms(105)));
    }

    #[test]
    fn zero_window_passes_everything() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(Duration::ZERO);
        assert_eq!(throttle.update(1, t0), Some(1));
        assert_eq!(throttle.update(2, t0), Some(2));
    }
}
