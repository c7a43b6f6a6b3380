//! `cl-common` — Shared types, traits, and errors for the Clipline engine.
//!
//! This crate is the foundation that all other engine crates depend on.
//! It defines the core abstractions:
//!
//! - **Types**: `TimeMs`, `Rational`, `Resolution`, `SourceId` (newtypes for safety)
//! - **Packets**: `EncodedSample`, `VideoFrame`, `VideoTrackInfo` (data flow types)
//! - **Assets**: `AssetStore` trait with directory and in-memory stores
//! - **Cancellation**: `CancelToken`, `Generation`/`Ticket` (last-caller-wins)
//! - **Errors**: `DecodeError`, `DemuxError`, `AssetError`, `ConfigError` (thiserror-based)
//! - **Config**: `EngineConfig` and its sections

pub mod asset;
pub mod cancel;
pub mod config;
pub mod error;
pub mod packet;
pub mod types;

// Re-export commonly used items at crate root
pub use asset::{normalize_source, AssetStore, DirAssetStore, MemoryAssetStore};
pub use cancel::{CancelToken, Generation, Ticket};
pub use config::{AudioConfig, DecoderConfig, EngineConfig, ExportSettings, PreviewConfig};
pub use error::{AssetError, ConfigError, DecodeError, DemuxError};
pub use packet::{EncodedSample, VideoFrame, VideoTrackInfo};
pub use types::{Rational, Resolution, SourceId, TimeMs};
