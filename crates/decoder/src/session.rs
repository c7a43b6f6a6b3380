//! Decode sessions: one opened container plus its frame decoder.
//!
//! A session remembers the last sample it fed to the decoder so that a
//! request for a later sample of the same GOP continues from there instead
//! of replaying from the sync sample.

use std::sync::Arc;

use cl_common::{AssetStore, DecodeError, SourceId, Ticket, TimeMs, VideoFrame, VideoTrackInfo};
use cl_demux::{Mp4Container, VideoContainer};
use tracing::{debug, info};

use crate::error::CodecError;
use crate::frame_decoder::{FrameDecoder, RawFrameDecoder};
use crate::prefetch::StatCounters;

/// Frames whose timestamps differ by less than this are the same frame.
const TIMESTAMP_EPSILON_MS: f64 = 1e-3;

/// An opened source, exclusively owned by one cache.
pub struct DecodeSession {
    container: Box<dyn VideoContainer>,
    decoder: Box<dyn FrameDecoder>,
    last_decoded: Option<usize>,
    needs_reset: bool,
}

impl DecodeSession {
    /// Configure `decoder` for the container's track and bundle both.
    pub fn new(
        container: Box<dyn VideoContainer>,
        mut decoder: Box<dyn FrameDecoder>,
    ) -> Result<Self, CodecError> {
        decoder.configure(container.track_info())?;
        Ok(Self {
            container,
            decoder,
            last_decoded: None,
            needs_reset: true,
        })
    }

    pub fn track_info(&self) -> &VideoTrackInfo {
        self.container.track_info()
    }

    pub fn container(&self) -> &dyn VideoContainer {
        self.container.as_ref()
    }

    /// Decode up to and including `target` (decode-order index) and return
    /// its frame.
    ///
    /// Continues from the previously decoded sample when it lies in the same
    /// GOP before `target`; otherwise resets and replays from the nearest
    /// preceding sync sample. `ticket` is checked before every sample.
    pub(crate) fn decode_through(
        &mut self,
        source: &SourceId,
        target: usize,
        ticket: &Ticket,
        stats: &StatCounters,
    ) -> Result<VideoFrame, DecodeError> {
        let (key, wanted) = {
            let table = self.container.sample_table();
            let key = table
                .find_sync_at_or_before(target)
                .ok_or_else(|| DecodeError::failed(source, format!("no sample {target}")))?;
            let wanted = table
                .timestamp(target)
                .ok_or_else(|| DecodeError::failed(source, format!("no sample {target}")))?;
            (key, wanted)
        };

        let resume = match self.last_decoded {
            Some(last) if !self.needs_reset && last >= key && last < target => last + 1,
            _ => {
                self.decoder.reset();
                self.last_decoded = None;
                self.needs_reset = false;
                key
            }
        };
        debug!(source = %source, key, resume, target, "Decoding GOP range");

        let mut found = None;
        for index in resume..=target {
            ticket.check()?;
            let sample = self.container.read_sample(index).map_err(|e| {
                self.needs_reset = true;
                DecodeError::failed(source, e)
            })?;
            let output = self.decoder.decode(&sample).map_err(|e| {
                self.needs_reset = true;
                DecodeError::failed(source, e)
            })?;
            stats.record_decoded();
            self.last_decoded = Some(index);

            if let Some(frame) = output {
                if same_time(frame.timestamp, wanted) {
                    found = Some(frame);
                }
            }
        }

        if found.is_none() {
            // The frame is still buffered in a reordering decoder.
            let drained = self.decoder.flush().map_err(|e| DecodeError::failed(source, e))?;
            self.needs_reset = true;
            found = drained.into_iter().find(|f| same_time(f.timestamp, wanted));
        }

        found.ok_or_else(|| {
            DecodeError::failed(source, format!("decoder produced no frame for sample {target}"))
        })
    }
}

fn same_time(a: TimeMs, b: TimeMs) -> bool {
    (a.as_millis() - b.as_millis()).abs() < TIMESTAMP_EPSILON_MS
}

/// Opens decode sessions for sources.
pub trait SessionFactory: Send + Sync {
    fn open(&self, source: &SourceId) -> Result<DecodeSession, DecodeError>;
}

impl<F> SessionFactory for F
where
    F: Fn(&SourceId) -> Result<DecodeSession, DecodeError> + Send + Sync,
{
    fn open(&self, source: &SourceId) -> Result<DecodeSession, DecodeError> {
        self(source)
    }
}

/// Builds a frame decoder for an opened track.
pub type DecoderConstructor =
    dyn Fn(&VideoTrackInfo) -> Result<Box<dyn FrameDecoder>, CodecError> + Send + Sync;

/// Reads MP4 files from an asset store.
pub struct AssetSessionFactory {
    assets: Arc<dyn AssetStore>,
    make_decoder: Arc<DecoderConstructor>,
}

impl AssetSessionFactory {
    pub fn new(
        assets: Arc<dyn AssetStore>,
        make_decoder: impl Fn(&VideoTrackInfo) -> Result<Box<dyn FrameDecoder>, CodecError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            assets,
            make_decoder: Arc::new(make_decoder),
        }
    }

    /// Factory for uncompressed RGBA tracks.
    pub fn raw(assets: Arc<dyn AssetStore>) -> Self {
        Self::new(assets, |_| Ok(Box::new(RawFrameDecoder::new())))
    }
}

impl SessionFactory for AssetSessionFactory {
    fn open(&self, source: &SourceId) -> Result<DecodeSession, DecodeError> {
        let bytes = self
            .assets
            .get_file(source.as_str())
            .map_err(|e| DecodeError::failed(source, e))?;
        let container = Mp4Container::open(bytes).map_err(|e| DecodeError::failed(source, e))?;
        let decoder =
            (self.make_decoder)(container.track_info()).map_err(|e| DecodeError::failed(source, e))?;
        let session = DecodeSession::new(Box::new(container), decoder)
            .map_err(|e| DecodeError::failed(source, e))?;
        info!(source = %source, codec = %session.track_info().codec, "Opened decode session");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_common::{Generation, MemoryAssetStore, Resolution};
    use cl_demux::InMemoryContainer;

    fn session(count: usize, gop: usize) -> DecodeSession {
        let container = InMemoryContainer::uniform(Resolution::new(1, 1), 40, count, gop).unwrap();
        DecodeSession::new(Box::new(container), Box::new(RawFrameDecoder::new())).unwrap()
    }

    #[test]
    fn replays_gop_from_sync_sample() {
        let mut s = session(10, 5);
        let stats = StatCounters::default();
        let ticket = Generation::new().next();
        let source = SourceId::new("a");

        let frame = s.decode_through(&source, 7, &ticket, &stats).unwrap();
        assert_eq!(frame.data[0], 7);
        assert_eq!(stats.snapshot().samples_decoded, 3); // 5, 6, 7
    }

    #[test]
    fn continues_within_gop() {
        let mut s = session(10, 5);
        let stats = StatCounters::default();
        let ticket = Generation::new().next();
        let source = SourceId::new("a");

        s.decode_through(&source, 1, &ticket, &stats).unwrap();
        s.decode_through(&source, 2, &ticket, &stats).unwrap();
        assert_eq!(stats.snapshot().samples_decoded, 3); // 0, 1 then 2

        // going backwards replays from the sync sample
        s.decode_through(&source, 1, &ticket, &stats).unwrap();
        assert_eq!(stats.snapshot().samples_decoded, 5);
    }

    #[test]
    fn stale_ticket_cancels() {
        let mut s = session(10, 5);
        let generation = Generation::new();
        let stale = generation.next();
        generation.next();
        let err = s
            .decode_through(&SourceId::new("a"), 3, &stale, &StatCounters::default())
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn missing_asset_is_decode_failure() {
        let factory = AssetSessionFactory::raw(Arc::new(MemoryAssetStore::new()));
        let err = factory.open(&SourceId::new("missing.mp4")).err().unwrap();
        assert!(matches!(err, DecodeError::Failed { .. }));
    }
}
