//! `cl-demux` — Random access to video samples.
//!
//! Opens the primary video track of a container, builds its sample table,
//! and reads encoded samples by index for the decode cache. MP4 parsing is
//! delegated to the `mp4` crate; [`memory::InMemoryContainer`] serves
//! synthetic tracks.

pub mod memory;
pub mod mp4;
pub mod sample;
pub mod traits;

pub use memory::{InMemoryContainer, SyntheticSample};
pub use self::mp4::Mp4Container;
pub use sample::{SampleEntry, SampleTable};
pub use traits::VideoContainer;
