//! `cl-audio` — Audio scheduling for the Clipline engine.
//!
//! This crate turns the timeline tree into audible output:
//!
//! - **Segments**: one [`AudioSegment`] per audio-bearing leaf, flattened once
//!   per rebuild
//! - **Scheduling**: overlap queries and per-segment decode with delays
//!   relative to the query window
//! - **Decoding**: Symphonia-based decode of AAC, MP3 and WAV from the asset
//!   store, with one cached decoder per segment
//! - **Mixing**: placement, resampling and channel conversion into one buffer
//! - **Output**: offline rendering for export, live playback on an
//!   [`AudioSink`] (CPAL device behind the `device-output` feature)
//!
//! # Architecture
//!
//! ```text
//! TimelineTree -> AudioTimeline -> SegmentDecoder -> AudioMixer -> AudioBuffer
//!                      |                                              |
//!                      v                                              v
//!                [AudioSegment]                          render_offline / AudioSink
//!                                                                     |
//!                                                                     v
//!                                                                AudioClock
//! ```

pub mod decoder;
pub mod error;
pub mod mixer;
#[cfg(feature = "device-output")]
pub mod output;
pub mod resampler;
pub mod scheduler;
pub mod segment;
pub mod sink;
pub mod sync;

pub use decoder::{
    AssetAudioDecoderFactory, AudioDecoderFactory, DecodedAudio, PcmDecoder, SegmentDecoder,
    SymphoniaDecoder,
};
pub use error::AudioError;
pub use mixer::{AudioBuffer, AudioMixer};
#[cfg(feature = "device-output")]
pub use output::DeviceSink;
pub use resampler::{resample_buffer, Resampler};
pub use scheduler::{AudioTimeline, ScheduleItem};
pub use segment::{build_segments, AudioSegment, SegmentId};
pub use sink::{AudioSink, MemorySink, NullSink};
pub use sync::AudioClock;
