//! Synthetic in-memory video track.
//!
//! Used for generated media (solid colors, test patterns) and to drive the
//! decode cache without real container files. Timestamps use a 1 ms
//! timescale and samples are presented in decode order.

use cl_common::{DemuxError, EncodedSample, Resolution, VideoTrackInfo};

use crate::sample::{SampleEntry, SampleTable};
use crate::traits::VideoContainer;

/// One synthetic sample.
#[derive(Clone, Debug)]
pub struct SyntheticSample {
    pub duration_ms: u32,
    pub is_key: bool,
    pub data: Vec<u8>,
}

/// A container whose samples live in memory.
#[derive(Clone, Debug)]
pub struct InMemoryContainer {
    info: VideoTrackInfo,
    table: SampleTable,
    payloads: Vec<Vec<u8>>,
}

impl InMemoryContainer {
    pub fn new(
        codec: &str,
        resolution: Resolution,
        samples: Vec<SyntheticSample>,
    ) -> Result<Self, DemuxError> {
        let mut entries = Vec::with_capacity(samples.len());
        let mut payloads = Vec::with_capacity(samples.len());
        let mut t: u64 = 0;
        for (index, sample) in samples.into_iter().enumerate() {
            entries.push(SampleEntry {
                index,
                size: sample.data.len() as u32,
                dts: t,
                cts: t as i64,
                duration: sample.duration_ms,
                is_sync: sample.is_key,
            });
            payloads.push(sample.data);
            t += sample.duration_ms as u64;
        }
        let table = SampleTable::new(entries, 1000)?;
        let info = VideoTrackInfo {
            track_id: 1,
            codec: codec.to_owned(),
            resolution,
            duration: table.total_duration(),
            sample_count: table.len(),
        };
        Ok(Self {
            info,
            table,
            payloads,
        })
    }

    /// Constant frame rate track of `count` frames with a key frame every
    /// `gop` samples. Each payload is a full RGBA frame whose bytes all
    /// equal the frame index (mod 256).
    pub fn uniform(
        resolution: Resolution,
        frame_ms: u32,
        count: usize,
        gop: usize,
    ) -> Result<Self, DemuxError> {
        let gop = gop.max(1);
        let samples = (0..count)
            .map(|i| SyntheticSample {
                duration_ms: frame_ms,
                is_key: i % gop == 0,
                data: vec![(i % 256) as u8; resolution.rgba_byte_size()],
            })
            .collect();
        Self::new("raw", resolution, samples)
    }
}

impl VideoContainer for InMemoryContainer {
    fn track_info(&self) -> &VideoTrackInfo {
        &self.info
    }

    fn sample_table(&self) -> &SampleTable {
        &self.table
    }

    fn read_sample(&mut self, index: usize) -> Result<EncodedSample, DemuxError> {
        let entry = self.table.entry(index)?;
        Ok(EncodedSample {
            index,
            data: self.payloads[index].clone(),
            timestamp: self.table.ticks_to_ms(entry.cts),
            duration: self.table.ticks_to_ms(entry.duration as i64),
            is_key: entry.is_sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_common::TimeMs;

    #[test]
    fn uniform_track_layout() {
        let mut container = InMemoryContainer::uniform(Resolution::new(2, 2), 40, 10, 4).unwrap();
        assert_eq!(container.track_info().sample_count, 10);
        assert_eq!(container.track_info().duration, TimeMs(400.0));
        assert_eq!(container.track_info().codec, "raw");

        let sample = container.read_sample(5).unwrap();
        assert_eq!(sample.timestamp, TimeMs(200.0));
        assert_eq!(sample.duration, TimeMs(40.0));
        assert!(!sample.is_key);
        assert_eq!(sample.data, vec![5u8; 16]);

        assert!(container.read_sample(4).unwrap().is_key);
        assert!(container.read_sample(10).is_err());
    }

    #[test]
    fn empty_track_is_rejected() {
        assert!(matches!(
            InMemoryContainer::new("raw", Resolution::new(1, 1), Vec::new()),
            Err(DemuxError::EmptyTrack)
        ));
    }
}
