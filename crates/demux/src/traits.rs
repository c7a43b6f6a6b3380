//! Video container trait definition.

use cl_common::{DemuxError, EncodedSample, VideoTrackInfo};

use crate::sample::SampleTable;

/// Random access to the primary video track of a container.
///
/// Implementations are opened once per source and then owned by a single
/// decode session, so `read_sample` takes `&mut self`.
pub trait VideoContainer: Send {
    /// Description of the primary video track.
    fn track_info(&self) -> &VideoTrackInfo;

    /// Sample table of the primary video track.
    fn sample_table(&self) -> &SampleTable;

    /// Read one sample by decode-order index.
    fn read_sample(&mut self, index: usize) -> Result<EncodedSample, DemuxError>;
}
