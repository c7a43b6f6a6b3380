//! `cl-decoder` — Per-source video frame decode cache.
//!
//! Turns "the frame at time `t` of source `s`" into decoded pixels while
//! decoding as few samples as possible. Each source gets its own
//! [`VideoFrameCache`] holding the frame last served plus one frame of
//! lookahead decoded on a background thread.
//!
//! # Architecture
//!
//! ```text
//!   VideoCacheManager ── SourceId ──► VideoFrameCache
//!                                        │  current / next slots
//!                                        ▼
//!                                   DecodeSession
//!                                 ┌──────┴───────┐
//!                          VideoContainer   FrameDecoder
//!                           (cl-demux)       (codec backend)
//! ```
//!
//! ## Module Overview
//!
//! - [`cache`] — Frame cache state machine, hits, seeks and cancellation
//! - [`prefetch`] — Background decode of the following frame, statistics
//! - [`session`] — GOP replay over a container and decoder pair
//! - [`frame_decoder`] — Codec abstraction and the raw RGBA decoder
//! - [`manager`] — Cache lifetime per source
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use cl_common::{DecoderConfig, DirAssetStore, SourceId, TimeMs};
//! use cl_decoder::{AssetSessionFactory, VideoCacheManager};
//!
//! let assets = Arc::new(DirAssetStore::new("media"));
//! let factory = Arc::new(AssetSessionFactory::raw(assets));
//! let mut manager = VideoCacheManager::new(factory, &DecoderConfig::default());
//!
//! let cache = manager.get_or_create(&SourceId::new("intro.mp4"));
//! let frame = cache.get_frame_at(TimeMs(1_250.0))?;
//! ```

pub mod cache;
pub mod error;
pub mod frame_decoder;
pub mod manager;
pub mod prefetch;
pub mod session;

pub use cache::{DecoderState, FrameBatch, FrameRequest, VideoFrameCache};
pub use error::CodecError;
pub use frame_decoder::{FrameDecoder, RawFrameDecoder, RAW_CODEC};
pub use manager::VideoCacheManager;
pub use prefetch::PrefetchStats;
pub use session::{AssetSessionFactory, DecodeSession, DecoderConstructor, SessionFactory};
