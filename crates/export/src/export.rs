//! Export pipeline: deterministic, frame-stepped rendering of a timeline.
//!
//! Unlike preview, export never drops or coalesces work. For every output
//! frame the loop waits until the scene is fully settled before composing,
//! so the muxer receives exactly one frame per index with strictly
//! increasing timestamps.
//!
//! # Architecture
//!
//! ```text
//! ExportPipeline::start(job)
//!   |
//!   +-- Spawn "export-pipeline" thread
//!   |     |
//!   |     +-- for i in 0..=floor(duration / interval):   t = i * 1000 / fps
//!   |     |     1. resolve(tree, t)                  (errors are fatal)
//!   |     |     2. get_frame_at(media time) per active video leaf
//!   |     |        + render_offline(audio span of frame i)   (in parallel)
//!   |     |     3. settle caches, settle compositor
//!   |     |     4. compositor.compose(scene)
//!   |     |     5. muxer: video frame, then audio span
//!   |     |     6. progress update over the channel
//!   |     |
//!   |     +-- muxer.finalize(), destroy caches
//!   |
//!   +-- Returns ExportHandle (progress, cancel, wait)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use cl_audio::{AudioBuffer, AudioError, AudioTimeline};
use cl_common::{
    CancelToken, DecodeError, ExportSettings, Rational, Resolution, SourceId, TimeMs, VideoFrame,
};
use cl_decoder::{VideoCacheManager, VideoFrameCache};
use cl_timeline_eval::{media_time, resolve, ActivationSet, NodeId, Project, TimelineTree};
use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::compositor::{Scene, SceneCompositor};
use crate::error::ExportError;
use crate::muxer::{MediaMuxer, OrderedMuxer};

// ---------------------------------------------------------------------------
// Export configuration
// ---------------------------------------------------------------------------

/// Output format and range of an export.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportConfig {
    pub resolution: Resolution,
    pub fps: Rational,
    /// Timeline span to render, starting at 0.
    pub duration: TimeMs,
    pub include_audio: bool,
}

impl ExportConfig {
    pub fn from_project(project: &Project, settings: &ExportSettings) -> Self {
        Self {
            resolution: project.resolution,
            fps: project.fps,
            duration: project.end,
            include_audio: settings.include_audio,
        }
    }

    pub fn frame_interval(&self) -> TimeMs {
        self.fps.frame_interval()
    }

    /// Frames rendered: one per index in `0..=floor(duration / interval)`.
    pub fn total_frames(&self) -> u64 {
        let frames = self.duration.as_millis() * self.fps.num as f64
            / (1000.0 * self.fps.den as f64);
        (frames + 1e-9).floor() as u64 + 1
    }

    /// Timeline time of frame `index`, computed from the index so error does
    /// not accumulate over long exports.
    pub fn frame_time(&self, index: u64) -> TimeMs {
        TimeMs(index as f64 * 1000.0 * self.fps.den as f64 / self.fps.num as f64)
    }

    /// Audio span `(start, duration)` in ms covering frame `index`, snapped
    /// to whole output samples so consecutive spans tile without gaps.
    pub fn audio_span(&self, index: u64, sample_rate: u32) -> (f64, f64) {
        let rate = sample_rate as f64;
        let to_sample = |t: TimeMs| (t.as_millis() * rate / 1000.0).round();
        let first = to_sample(self.frame_time(index));
        let last = to_sample(self.frame_time(index + 1));
        (first * 1000.0 / rate, (last - first) * 1000.0 / rate)
    }

    pub fn validate(&self) -> Result<(), ExportError> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(ExportError::InvalidConfig(
                "Resolution must be > 0".to_string(),
            ));
        }
        if self.fps.num == 0 || self.fps.den == 0 {
            return Err(ExportError::InvalidConfig(format!(
                "Frame rate {} is not positive",
                self.fps
            )));
        }
        if !self.duration.as_millis().is_finite() || self.duration.as_millis() <= 0.0 {
            return Err(ExportError::InvalidConfig(format!(
                "Duration must be > 0, got {}",
                self.duration
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Export progress
// ---------------------------------------------------------------------------

/// Progress update from the export thread.
#[derive(Clone, Debug, PartialEq)]
pub enum ExportProgress {
    Started {
        total_frames: u64,
    },
    /// Frame `frame` (0-based) was handed to the muxer.
    FrameWritten {
        frame: u64,
        total: u64,
        time: TimeMs,
    },
    Completed {
        frames: u64,
        duration_secs: f64,
    },
    Failed {
        error: String,
    },
    Cancelled,
}

impl ExportProgress {
    /// Progress as a fraction (0.0 to 1.0).
    pub fn progress_fraction(&self) -> f64 {
        match self {
            Self::Started { .. } => 0.0,
            Self::FrameWritten { frame, total, .. } => {
                if *total > 0 {
                    (*frame + 1) as f64 / *total as f64
                } else {
                    0.0
                }
            }
            Self::Completed { .. } => 1.0,
            Self::Failed { .. } | Self::Cancelled => 0.0,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Started { .. } | Self::FrameWritten { .. })
    }

    /// Success, failure or cancellation.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}

/// Result of a finished export.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportSummary {
    pub frames: u64,
    /// Audio frames handed to the muxer, 0 without audio.
    pub audio_frames: u64,
    pub duration_secs: f64,
}

// ---------------------------------------------------------------------------
// Export job
// ---------------------------------------------------------------------------

/// Everything one export needs, owned by the export thread while it runs.
///
/// The audio timeline must already be built for `tree`.
pub struct ExportJob {
    tree: Arc<TimelineTree>,
    config: ExportConfig,
    caches: VideoCacheManager,
    audio: Option<Arc<AudioTimeline>>,
    compositor: Box<dyn SceneCompositor>,
    muxer: OrderedMuxer<Box<dyn MediaMuxer>>,
    /// Last successfully decoded frame per video node.
    displayed: HashMap<NodeId, VideoFrame>,
}

impl std::fmt::Debug for ExportJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportJob")
            .field("config", &self.config)
            .field("nodes", &self.tree.len())
            .field("caches", &self.caches)
            .field("audio", &self.audio.is_some())
            .finish()
    }
}

struct NodeRequest {
    node: NodeId,
    cache: Arc<VideoFrameCache>,
    at: TimeMs,
}

impl ExportJob {
    pub fn new(
        tree: Arc<TimelineTree>,
        config: ExportConfig,
        caches: VideoCacheManager,
        compositor: Box<dyn SceneCompositor>,
        muxer: Box<dyn MediaMuxer>,
    ) -> Self {
        Self {
            tree,
            config,
            caches,
            audio: None,
            compositor,
            muxer: OrderedMuxer::new(muxer),
            displayed: HashMap::new(),
        }
    }

    pub fn with_audio(mut self, audio: Arc<AudioTimeline>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Run the export on the calling thread.
    ///
    /// Progress is sent on `progress`; a closed receiver does not stop the
    /// export. Returns [`ExportError::Cancelled`] once `cancel` fires.
    pub fn run(
        mut self,
        cancel: &CancelToken,
        progress: &Sender<ExportProgress>,
    ) -> Result<ExportSummary, ExportError> {
        self.config.validate()?;
        let total_frames = self.config.total_frames();
        let started = Instant::now();

        info!(
            resolution = %self.config.resolution,
            fps = %self.config.fps,
            duration = %self.config.duration,
            frames = total_frames,
            audio = self.config.include_audio && self.audio.is_some(),
            "Starting export"
        );
        let _ = progress.send(ExportProgress::Started { total_frames });

        let result = self.render_all(total_frames, cancel, progress);
        self.caches.destroy_all();

        let duration_secs = started.elapsed().as_secs_f64();
        match &result {
            Ok(summary) => {
                info!(
                    frames = summary.frames,
                    audio_frames = summary.audio_frames,
                    duration_secs,
                    "Export completed"
                );
                let _ = progress.send(ExportProgress::Completed {
                    frames: summary.frames,
                    duration_secs,
                });
            }
            Err(ExportError::Cancelled) => {
                info!("Export cancelled");
                let _ = progress.send(ExportProgress::Cancelled);
            }
            Err(e) => {
                warn!(error = %e, "Export failed");
                let _ = progress.send(ExportProgress::Failed {
                    error: e.to_string(),
                });
            }
        }
        result.map(|summary| ExportSummary {
            duration_secs,
            ..summary
        })
    }

    fn render_all(
        &mut self,
        total_frames: u64,
        cancel: &CancelToken,
        progress: &Sender<ExportProgress>,
    ) -> Result<ExportSummary, ExportError> {
        let interval = self.config.frame_interval();
        let audio = if self.config.include_audio {
            self.audio.clone()
        } else {
            None
        };
        let mut audio_frames = 0u64;

        for index in 0..total_frames {
            if cancel.is_cancelled() {
                info!(frame = index, total = total_frames, "Export cancelled between frames");
                return Err(ExportError::Cancelled);
            }

            let t = self.config.frame_time(index);
            let activation = resolve(&self.tree, t.as_millis())?;
            let requests = self.frame_requests(&activation)?;
            let span = audio
                .as_ref()
                .map(|a| (Arc::clone(a), self.config.audio_span(index, a.sample_rate())));

            let (frames, audio_buffer) = fetch(&requests, span);
            self.apply_frames(&requests, frames, t);
            self.displayed.retain(|node, _| activation.contains(*node));

            self.caches.settle_all();
            self.compositor.settle()?;

            let composed = self.compositor.compose(&Scene {
                time: t,
                resolution: self.config.resolution,
                activation: &activation,
                frames: &self.displayed,
            })?;
            self.muxer.add_video_frame(&composed.pixels, t, interval)?;
            if let Some(buffer) = audio_buffer.transpose()? {
                audio_frames += buffer.frames() as u64;
                self.muxer.add_audio_buffer(&buffer)?;
            }

            debug!(
                frame = index,
                total = total_frames,
                time = %t,
                layers = self.displayed.len(),
                "Export frame written"
            );
            let _ = progress.send(ExportProgress::FrameWritten {
                frame: index,
                total: total_frames,
                time: t,
            });
        }

        self.muxer.finalize()?;
        Ok(ExportSummary {
            frames: total_frames,
            audio_frames,
            duration_secs: 0.0,
        })
    }

    /// One request per active video leaf, at the leaf's media time.
    fn frame_requests(&mut self, activation: &ActivationSet) -> Result<Vec<NodeRequest>, ExportError> {
        let mut requests = Vec::new();
        for entry in activation.leaves() {
            let Some(leaf) = self.tree.node(entry.node)?.as_leaf() else {
                continue;
            };
            let Some(source) = leaf.source.as_ref().filter(|_| leaf.kind.has_video()) else {
                continue;
            };
            requests.push(NodeRequest {
                node: entry.node,
                cache: self.caches.get_or_create(source),
                at: TimeMs(media_time(entry, leaf)),
            });
        }
        Ok(requests)
    }

    fn apply_frames(
        &mut self,
        requests: &[NodeRequest],
        results: Vec<Result<VideoFrame, DecodeError>>,
        t: TimeMs,
    ) {
        for (request, result) in requests.iter().zip(results) {
            match result {
                Ok(frame) => {
                    self.displayed.insert(request.node, frame);
                }
                Err(DecodeError::Cancelled) => {
                    debug!(node = %request.node, "Frame request superseded");
                }
                Err(e) => {
                    warn!(
                        node = %request.node,
                        time = %t,
                        media_time = %request.at,
                        error = %e,
                        "Frame request failed, keeping previous frame"
                    );
                }
            }
        }
    }
}

/// Run all frame requests and the audio render concurrently.
///
/// Requests on the same cache run one after another on a single thread so
/// two nodes showing the same source do not supersede each other.
#[allow(clippy::type_complexity)]
fn fetch(
    requests: &[NodeRequest],
    audio: Option<(Arc<AudioTimeline>, (f64, f64))>,
) -> (
    Vec<Result<VideoFrame, DecodeError>>,
    Option<Result<AudioBuffer, AudioError>>,
) {
    let mut groups: Vec<(&SourceId, Vec<usize>)> = Vec::new();
    for (index, request) in requests.iter().enumerate() {
        let source = request.cache.source_id();
        match groups.iter_mut().find(|(s, _)| *s == source) {
            Some((_, members)) => members.push(index),
            None => groups.push((source, vec![index])),
        }
    }

    std::thread::scope(|scope| {
        let audio_handle = audio.map(|(timeline, (start, duration))| {
            scope.spawn(move || timeline.render_offline(start, duration))
        });
        let handles: Vec<_> = groups
            .iter()
            .map(|(source, members)| {
                let handle = scope.spawn(move || {
                    members
                        .iter()
                        .map(|&i| (i, requests[i].cache.get_frame_at(requests[i].at)))
                        .collect::<Vec<_>>()
                });
                (*source, members, handle)
            })
            .collect();

        let mut frames: Vec<Result<VideoFrame, DecodeError>> = Vec::with_capacity(requests.len());
        frames.resize_with(requests.len(), || Err(DecodeError::Cancelled));
        for (source, members, handle) in handles {
            match handle.join() {
                Ok(results) => {
                    for (i, result) in results {
                        frames[i] = result;
                    }
                }
                Err(_) => {
                    for &i in members {
                        frames[i] = Err(panicked_request(source));
                    }
                }
            }
        }

        let audio = audio_handle.map(|handle| {
            handle
                .join()
                .unwrap_or_else(|_| Err(AudioError::Decode("audio render panicked".to_string())))
        });
        (frames, audio)
    })
}

fn panicked_request(source: &SourceId) -> DecodeError {
    DecodeError::failed(source, "frame request panicked")
}

// ---------------------------------------------------------------------------
// Export handle
// ---------------------------------------------------------------------------

/// Handle for monitoring and controlling a running export.
#[derive(Debug)]
pub struct ExportHandle {
    progress_rx: Receiver<ExportProgress>,
    cancel: CancelToken,
    config: ExportConfig,
    thread: JoinHandle<Result<ExportSummary, ExportError>>,
}

impl ExportHandle {
    /// Next progress update, if one is pending.
    pub fn try_recv_progress(&self) -> Option<ExportProgress> {
        self.progress_rx.try_recv().ok()
    }

    /// Wait for the next progress update. `None` once the export thread is
    /// gone and every update was received.
    pub fn recv_progress(&self) -> Option<ExportProgress> {
        self.progress_rx.recv().ok()
    }

    pub fn drain_progress(&self) -> Vec<ExportProgress> {
        self.progress_rx.try_iter().collect()
    }

    /// Request cancellation. Takes effect before the next frame.
    pub fn cancel(&self) {
        self.cancel.cancel();
        info!("Export cancellation requested");
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the export thread ends and return its result.
    pub fn wait(self) -> Result<ExportSummary, ExportError> {
        self.thread.join().map_err(|_| ExportError::ThreadPanicked)?
    }
}

// ---------------------------------------------------------------------------
// Export pipeline
// ---------------------------------------------------------------------------

/// Starts exports on a dedicated thread.
pub struct ExportPipeline;

impl ExportPipeline {
    /// Validate `job` and run it on a new `export-pipeline` thread.
    pub fn start(job: ExportJob) -> Result<ExportHandle, ExportError> {
        job.config.validate()?;

        let (progress_tx, progress_rx) = channel::unbounded::<ExportProgress>();
        let cancel = CancelToken::new();
        let config = job.config.clone();

        let thread_cancel = cancel.clone();
        let thread = std::thread::Builder::new()
            .name("export-pipeline".to_string())
            .spawn(move || job.run(&thread_cancel, &progress_tx))
            .map_err(|e| ExportError::InitFailed(format!("Failed to spawn export thread: {e}")))?;

        Ok(ExportHandle {
            progress_rx,
            cancel,
            config,
            thread,
        })
    }
}
