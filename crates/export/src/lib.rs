//! `cl-export` — Export loop and interactive preview for the Clipline engine.
//!
//! Two clocks drive the same timeline:
//!
//! - **Export** ([`ExportPipeline`]): frame-stepped and deterministic. Every
//!   frame waits for decode, audio and compositor to settle before the
//!   composed picture and its audio span reach the [`MediaMuxer`].
//! - **Preview** ([`PreviewSession`]): wall-clock driven. Time updates are
//!   coalesced by a [`Throttle`], frame requests run in the background and
//!   superseded requests are dropped.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────── ExportJob ────────────────┐
//! TimelineTree ──►│ resolve ─► VideoCacheManager ─► Scene ─►  │──► MediaMuxer
//!                 │        └─► AudioTimeline::render_offline ─┼──►   (ordered)
//!                 └───────────────────────────────────────────┘
//!
//!                 ┌────────────── PreviewSession ─────────────┐
//! set_time(t) ───►│ Throttle ─► resolve ─► background requests│──► frame(node)
//! play/stop ─────►│ AudioTimeline::play ─► AudioSink          │
//!                 └───────────────────────────────────────────┘
//! ```

pub mod compositor;
pub mod error;
pub mod export;
pub mod muxer;
pub mod preview;
pub mod settle;

pub use compositor::{ComposedFrame, Scene, SceneCompositor, StackCompositor};
pub use error::{CompositorError, ExportError, MuxError};
pub use export::{
    ExportConfig, ExportHandle, ExportJob, ExportPipeline, ExportProgress, ExportSummary,
};
pub use muxer::{MediaMuxer, MemoryMuxer, MuxRecording, MuxedFrame, OrderedMuxer};
pub use preview::{PreviewSession, Throttle};
pub use settle::{SettleGuard, SettleTracker};
