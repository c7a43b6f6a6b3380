//! End-to-end export over synthetic media: frame stepping, audio spans,
//! failure isolation and cancellation.

use std::sync::Arc;

use cl_audio::{AudioError, AudioTimeline, PcmDecoder, SegmentDecoder};
use cl_common::{
    AudioConfig, CancelToken, DecodeError, DecoderConfig, EncodedSample, Resolution, SourceId,
    TimeMs, VideoFrame, VideoTrackInfo,
};
use cl_decoder::{
    CodecError, DecodeSession, FrameDecoder, RawFrameDecoder, SessionFactory, VideoCacheManager,
};
use cl_demux::InMemoryContainer;
use cl_export::{
    ComposedFrame, CompositorError, ExportConfig, ExportError, ExportJob, ExportPipeline,
    ExportProgress, MemoryMuxer, Scene, SceneCompositor, StackCompositor,
};
use cl_timeline_eval::{NodeId, TimelineNode, TimelineTree};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;

const FRAME_MS: u32 = 40;
const SAMPLE_RATE: u32 = 48_000;

// ── Fakes ──

/// Raw decoder that fails on every sample from `from` on.
struct FailFrom {
    inner: RawFrameDecoder,
    from: usize,
}

impl FrameDecoder for FailFrom {
    fn configure(&mut self, track: &VideoTrackInfo) -> Result<(), CodecError> {
        self.inner.configure(track)
    }

    fn decode(&mut self, sample: &EncodedSample) -> Result<Option<VideoFrame>, CodecError> {
        if sample.index >= self.from {
            return Err(CodecError::Corrupt {
                index: sample.index,
                reason: "bitstream error".into(),
            });
        }
        self.inner.decode(sample)
    }

    fn flush(&mut self) -> Result<Vec<VideoFrame>, CodecError> {
        self.inner.flush()
    }

    fn reset(&mut self) {
        self.inner.reset()
    }
}

fn session_factory<D>(make: D) -> Arc<dyn SessionFactory>
where
    D: Fn() -> Box<dyn FrameDecoder> + Send + Sync + 'static,
{
    Arc::new(move |s: &SourceId| -> Result<DecodeSession, DecodeError> {
        let container = InMemoryContainer::uniform(Resolution::new(2, 2), FRAME_MS, 100, 10)
            .map_err(|e| DecodeError::failed(s, e))?;
        DecodeSession::new(Box::new(container), make()).map_err(|e| DecodeError::failed(s, e))
    })
}

fn caches(factory: Arc<dyn SessionFactory>, prefetch: bool) -> VideoCacheManager {
    VideoCacheManager::new(factory, &DecoderConfig { prefetch })
}

fn audio_timeline(tree: &TimelineTree) -> Arc<AudioTimeline> {
    let factory = Arc::new(
        |_: &SourceId| -> Result<Box<dyn SegmentDecoder>, AudioError> {
            Ok(Box::new(PcmDecoder::constant(0.25, 5000.0, SAMPLE_RATE, 2)))
        },
    );
    let timeline = AudioTimeline::new(
        factory,
        &AudioConfig {
            sample_rate: SAMPLE_RATE,
            channels: 2,
        },
    );
    timeline.build_timeline(tree).unwrap();
    Arc::new(timeline)
}

/// What the compositor saw for one output frame.
#[derive(Clone, Debug)]
struct SceneRecord {
    time: TimeMs,
    /// Timestamp of the displayed frame per node.
    frames: Vec<(NodeId, TimeMs)>,
}

/// Compositor that records scenes and optionally parks on one frame.
#[derive(Default)]
struct RecordingCompositor {
    scenes: Arc<Mutex<Vec<SceneRecord>>>,
    settles: Arc<Mutex<usize>>,
    gate: Option<(usize, Sender<()>, Receiver<()>)>,
}

impl SceneCompositor for RecordingCompositor {
    fn compose(&mut self, scene: &Scene<'_>) -> Result<ComposedFrame, CompositorError> {
        let index = {
            let mut scenes = self.scenes.lock();
            let mut frames: Vec<_> = scene
                .frames
                .iter()
                .filter(|(node, _)| scene.activation.contains(**node))
                .map(|(node, frame)| (*node, frame.timestamp))
                .collect();
            frames.sort_by_key(|(node, _)| *node);
            scenes.push(SceneRecord {
                time: scene.time,
                frames,
            });
            scenes.len() - 1
        };
        if let Some((at, reached, release)) = &self.gate {
            if index == *at {
                reached.send(()).unwrap();
                release.recv().unwrap();
            }
        }
        Ok(ComposedFrame {
            resolution: scene.resolution,
            pixels: vec![0u8; scene.resolution.rgba_byte_size()],
        })
    }

    fn settle(&mut self) -> Result<(), CompositorError> {
        *self.settles.lock() += 1;
        Ok(())
    }
}

fn one_clip_tree() -> (TimelineTree, NodeId) {
    let mut tree = TimelineTree::with_end(1000.0);
    let clip = tree.add_root(TimelineNode::video("a.mp4").with_duration(1000.0));
    (tree, clip)
}

fn config(include_audio: bool) -> ExportConfig {
    ExportConfig {
        resolution: Resolution::new(2, 2),
        fps: cl_common::Rational::FPS_10,
        duration: TimeMs(1000.0),
        include_audio,
    }
}

fn raw() -> Box<dyn FrameDecoder> {
    Box::new(RawFrameDecoder::new())
}

// ── Frame stepping ──

#[test]
fn one_second_at_ten_fps_writes_eleven_increasing_frames() {
    let (tree, _) = one_clip_tree();
    let audio = audio_timeline(&tree);
    let muxer = MemoryMuxer::new();
    let job = ExportJob::new(
        Arc::new(tree),
        config(true),
        caches(session_factory(raw), true),
        Box::new(StackCompositor::new()),
        Box::new(muxer.clone()),
    )
    .with_audio(audio);

    let (tx, rx) = unbounded();
    let summary = job.run(&CancelToken::new(), &tx).unwrap();
    assert_eq!(summary.frames, 11);

    let recording = muxer.recording();
    assert!(recording.finalized);
    assert_eq!(recording.frames.len(), 11);
    for (i, frame) in recording.frames.iter().enumerate() {
        assert!((frame.timestamp.as_millis() - i as f64 * 100.0).abs() < 1e-9);
        assert!((frame.duration.as_millis() - 100.0).abs() < 1e-9);
        assert_eq!(frame.pixels.len(), 16);
    }
    assert!(recording
        .frames
        .windows(2)
        .all(|w| w[0].timestamp < w[1].timestamp));

    let progress: Vec<_> = rx.try_iter().collect();
    assert_eq!(progress.first(), Some(&ExportProgress::Started { total_frames: 11 }));
    assert!(matches!(progress.last(), Some(ExportProgress::Completed { frames: 11, .. })));
    let written = progress
        .iter()
        .filter(|p| matches!(p, ExportProgress::FrameWritten { .. }))
        .count();
    assert_eq!(written, 11);
}

#[test]
fn each_frame_carries_its_audio_span() {
    let (tree, _) = one_clip_tree();
    let audio = audio_timeline(&tree);
    let muxer = MemoryMuxer::new();
    let job = ExportJob::new(
        Arc::new(tree),
        config(true),
        caches(session_factory(raw), true),
        Box::new(StackCompositor::new()),
        Box::new(muxer.clone()),
    )
    .with_audio(audio);

    let (tx, _rx) = unbounded();
    let summary = job.run(&CancelToken::new(), &tx).unwrap();

    let recording = muxer.recording();
    assert_eq!(recording.audio.len(), 11);
    for buffer in &recording.audio {
        assert_eq!(buffer.frames(), 4800);
        assert_eq!(buffer.sample_rate, SAMPLE_RATE);
    }
    assert_eq!(summary.audio_frames, 11 * 4800);
    // The clip ends at 1000 ms; the last span is silent.
    assert!(recording.audio[0].peak() > 0.0);
    assert_eq!(recording.audio[10].peak(), 0.0);
}

#[test]
fn audio_can_be_excluded() {
    let (tree, _) = one_clip_tree();
    let audio = audio_timeline(&tree);
    let muxer = MemoryMuxer::new();
    let job = ExportJob::new(
        Arc::new(tree),
        config(false),
        caches(session_factory(raw), true),
        Box::new(StackCompositor::new()),
        Box::new(muxer.clone()),
    )
    .with_audio(audio);

    let (tx, _rx) = unbounded();
    let summary = job.run(&CancelToken::new(), &tx).unwrap();
    assert_eq!(summary.audio_frames, 0);
    assert!(muxer.recording().audio.is_empty());
    assert_eq!(muxer.recording().frames.len(), 11);
}

#[test]
fn scenes_show_the_frame_at_media_time() {
    let mut tree = TimelineTree::with_end(1000.0);
    let clip = tree.add_root(
        TimelineNode::video("a.mp4")
            .with_start(200.0)
            .with_duration(500.0)
            .with_media_start(1000.0),
    );
    let compositor = RecordingCompositor::default();
    let scenes = Arc::clone(&compositor.scenes);
    let settles = Arc::clone(&compositor.settles);
    let job = ExportJob::new(
        Arc::new(tree),
        config(false),
        caches(session_factory(raw), true),
        Box::new(compositor),
        Box::new(MemoryMuxer::new()),
    );

    let (tx, _rx) = unbounded();
    job.run(&CancelToken::new(), &tx).unwrap();

    let scenes = scenes.lock();
    assert_eq!(scenes.len(), 11);
    assert_eq!(*settles.lock(), 11);
    for scene in scenes.iter() {
        let t = scene.time.as_millis();
        if (200.0..700.0).contains(&t) {
            // Media time = (t - 200) + 1000, snapped to the 40 ms frame grid.
            let media = t - 200.0 + 1000.0;
            let expected = (media / FRAME_MS as f64).floor() * FRAME_MS as f64;
            assert_eq!(scene.frames, vec![(clip, TimeMs(expected))], "at {t}");
        } else {
            assert!(scene.frames.is_empty(), "at {t}");
        }
    }
}

#[test]
fn nodes_sharing_a_source_appear_in_every_scene() {
    let mut tree = TimelineTree::with_end(1000.0);
    let early = tree.add_root(TimelineNode::video("a.mp4").with_duration(1000.0));
    let late = tree.add_root(
        TimelineNode::video("a.mp4")
            .with_duration(1000.0)
            .with_media_start(2000.0),
    );
    let compositor = RecordingCompositor::default();
    let scenes = Arc::clone(&compositor.scenes);
    let job = ExportJob::new(
        Arc::new(tree),
        config(false),
        caches(session_factory(raw), true),
        Box::new(compositor),
        Box::new(MemoryMuxer::new()),
    );

    let (tx, _rx) = unbounded();
    job.run(&CancelToken::new(), &tx).unwrap();

    let snap = |ms: f64| TimeMs((ms / FRAME_MS as f64).floor() * FRAME_MS as f64);
    let scenes = scenes.lock();
    assert_eq!(scenes.len(), 11);
    for scene in scenes.iter() {
        let t = scene.time.as_millis();
        if t < 1000.0 {
            assert_eq!(
                scene.frames,
                vec![(early, snap(t)), (late, snap(t + 2000.0))],
                "at {t}"
            );
        } else {
            assert!(scene.frames.is_empty(), "at {t}");
        }
    }
}

// ── Failures ──

#[test]
fn failed_decode_keeps_previous_frame() {
    let (tree, clip) = one_clip_tree();
    let compositor = RecordingCompositor::default();
    let scenes = Arc::clone(&compositor.scenes);
    let muxer = MemoryMuxer::new();
    // Samples 5 and later (media time >= 200 ms) fail to decode.
    let factory = session_factory(|| {
        Box::new(FailFrom {
            inner: RawFrameDecoder::new(),
            from: 5,
        })
    });
    let job = ExportJob::new(
        Arc::new(tree),
        config(false),
        caches(factory, false),
        Box::new(compositor),
        Box::new(muxer.clone()),
    );

    let (tx, _rx) = unbounded();
    let summary = job.run(&CancelToken::new(), &tx).unwrap();
    assert_eq!(summary.frames, 11);
    assert_eq!(muxer.recording().frames.len(), 11);

    let scenes = scenes.lock();
    assert_eq!(scenes[0].frames, vec![(clip, TimeMs(0.0))]);
    assert_eq!(scenes[1].frames, vec![(clip, TimeMs(80.0))]);
    for scene in &scenes[2..10] {
        assert_eq!(scene.frames, vec![(clip, TimeMs(80.0))], "at {}", scene.time);
    }
}

#[test]
fn activation_error_is_fatal() {
    // No project end and no duration: the clip's window cannot be resolved.
    let mut tree = TimelineTree::new();
    tree.add_root(TimelineNode::video("a.mp4"));
    let muxer = MemoryMuxer::new();
    let job = ExportJob::new(
        Arc::new(tree),
        config(false),
        caches(session_factory(raw), true),
        Box::new(StackCompositor::new()),
        Box::new(muxer.clone()),
    );

    let (tx, rx) = unbounded();
    let err = job.run(&CancelToken::new(), &tx).unwrap_err();
    assert!(matches!(err, ExportError::Timeline(_)));
    assert!(muxer.recording().frames.is_empty());
    assert!(!muxer.recording().finalized);
    assert!(matches!(
        rx.try_iter().last(),
        Some(ExportProgress::Failed { .. })
    ));
}

#[test]
fn invalid_config_is_rejected_before_starting() {
    let (tree, _) = one_clip_tree();
    let mut bad = config(false);
    bad.duration = TimeMs(0.0);
    let job = ExportJob::new(
        Arc::new(tree),
        bad,
        caches(session_factory(raw), true),
        Box::new(StackCompositor::new()),
        Box::new(MemoryMuxer::new()),
    );
    assert!(matches!(
        ExportPipeline::start(job),
        Err(ExportError::InvalidConfig(_))
    ));
}

// ── Cancellation ──

#[test]
fn cancelled_token_stops_before_first_frame() {
    let (tree, _) = one_clip_tree();
    let muxer = MemoryMuxer::new();
    let job = ExportJob::new(
        Arc::new(tree),
        config(false),
        caches(session_factory(raw), true),
        Box::new(StackCompositor::new()),
        Box::new(muxer.clone()),
    );

    let cancel = CancelToken::new();
    cancel.cancel();
    let (tx, rx) = unbounded();
    let err = job.run(&cancel, &tx).unwrap_err();
    assert!(err.is_cancelled());
    assert!(muxer.recording().frames.is_empty());

    let progress: Vec<_> = rx.try_iter().collect();
    assert_eq!(progress.last(), Some(&ExportProgress::Cancelled));
    assert!(!progress
        .iter()
        .any(|p| matches!(p, ExportProgress::Failed { .. })));
}

#[test]
fn pipeline_cancel_takes_effect_between_frames() {
    let (tree, _) = one_clip_tree();
    let (reached_tx, reached_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let compositor = RecordingCompositor {
        gate: Some((2, reached_tx, release_rx)),
        ..RecordingCompositor::default()
    };
    let muxer = MemoryMuxer::new();
    let job = ExportJob::new(
        Arc::new(tree),
        config(false),
        caches(session_factory(raw), true),
        Box::new(compositor),
        Box::new(muxer.clone()),
    );

    let handle = ExportPipeline::start(job).unwrap();
    reached_rx.recv().unwrap();
    handle.cancel();
    assert!(handle.is_cancel_requested());
    release_tx.send(()).unwrap();

    let err = handle.wait().unwrap_err();
    assert!(err.is_cancelled());
    let recording = muxer.recording();
    // Frame 2 was already being composed and is still written.
    assert_eq!(recording.frames.len(), 3);
    assert!(!recording.finalized);
}

#[test]
fn pipeline_reports_progress_until_completion() {
    let (tree, _) = one_clip_tree();
    let job = ExportJob::new(
        Arc::new(tree),
        config(false),
        caches(session_factory(raw), true),
        Box::new(StackCompositor::new()),
        Box::new(MemoryMuxer::new()),
    );

    let handle = ExportPipeline::start(job).unwrap();
    assert_eq!(handle.config().fps, cl_common::Rational::FPS_10);
    let mut updates = Vec::new();
    while let Some(update) = handle.recv_progress() {
        let done = update.is_finished();
        updates.push(update);
        if done {
            break;
        }
    }
    assert!(matches!(updates.last(), Some(ExportProgress::Completed { frames: 11, .. })));
    let summary = handle.wait().unwrap();
    assert_eq!(summary.frames, 11);
}
