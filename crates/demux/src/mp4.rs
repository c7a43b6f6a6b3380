//! MP4 container access through the `mp4` crate.
//!
//! The file is held in memory (asset stores hand out whole byte buffers).
//! Opening reads the header, picks the first video track and builds its
//! [`SampleTable`]; samples are then read on demand.

use std::io::{BufReader, Cursor};

use cl_common::{DemuxError, EncodedSample, Resolution, VideoTrackInfo};
use ::mp4::{Mp4Reader, TrackType};
use tracing::{debug, info};

use crate::sample::{SampleEntry, SampleTable};
use crate::traits::VideoContainer;

type Reader = Mp4Reader<BufReader<Cursor<Vec<u8>>>>;

/// Primary video track of an in-memory MP4 file.
pub struct Mp4Container {
    reader: Reader,
    info: VideoTrackInfo,
    table: SampleTable,
}

impl Mp4Container {
    pub fn open(data: Vec<u8>) -> Result<Self, DemuxError> {
        let size = data.len() as u64;
        let mut reader = Mp4Reader::read_header(BufReader::new(Cursor::new(data)), size)
            .map_err(|e| DemuxError::UnsupportedContainer(e.to_string()))?;

        let track = reader
            .tracks()
            .values()
            .filter(|t| matches!(t.track_type(), Ok(TrackType::Video)))
            .min_by_key(|t| t.track_id())
            .ok_or(DemuxError::NoVideoTrack)?;

        let track_id = track.track_id();
        let timescale = track.timescale();
        let resolution = Resolution::new(track.width() as u32, track.height() as u32);
        let codec = track
            .media_type()
            .map(|m| m.to_string())
            .unwrap_or_else(|_| "unknown".to_owned());

        let sample_count = reader
            .sample_count(track_id)
            .map_err(|e| invalid(format!("sample count: {e}")))?;

        let mut samples = Vec::with_capacity(sample_count as usize);
        for sample_id in 1..=sample_count {
            let sample = reader
                .read_sample(track_id, sample_id)
                .map_err(|e| invalid(format!("sample {sample_id}: {e}")))?
                .ok_or_else(|| invalid(format!("sample {sample_id} missing")))?;
            samples.push(SampleEntry {
                index: (sample_id - 1) as usize,
                size: sample.bytes.len() as u32,
                dts: sample.start_time,
                cts: sample.start_time as i64 + sample.rendering_offset as i64,
                duration: sample.duration,
                is_sync: sample.is_sync,
            });
        }
        let table = SampleTable::new(samples, timescale)?;

        let info = VideoTrackInfo {
            track_id,
            codec,
            resolution,
            duration: table.total_duration(),
            sample_count: table.len(),
        };
        info!(
            track_id,
            codec = %info.codec,
            resolution = %info.resolution,
            samples = info.sample_count,
            duration = %info.duration,
            "Opened MP4 video track"
        );

        Ok(Self {
            reader,
            info,
            table,
        })
    }
}

impl VideoContainer for Mp4Container {
    fn track_info(&self) -> &VideoTrackInfo {
        &self.info
    }

    fn sample_table(&self) -> &SampleTable {
        &self.table
    }

    fn read_sample(&mut self, index: usize) -> Result<EncodedSample, DemuxError> {
        let entry = self.table.entry(index)?;
        let timestamp = self.table.ticks_to_ms(entry.cts);
        let duration = self.table.ticks_to_ms(entry.duration as i64);
        let is_key = entry.is_sync;

        let sample = self
            .reader
            .read_sample(self.info.track_id, index as u32 + 1)
            .map_err(|e| invalid(format!("sample {index}: {e}")))?
            .ok_or(DemuxError::SampleOutOfRange {
                index,
                count: self.table.len(),
            })?;
        debug!(index, bytes = sample.bytes.len(), "Read sample");

        Ok(EncodedSample {
            index,
            data: sample.bytes.to_vec(),
            timestamp,
            duration,
            is_key,
        })
    }
}

fn invalid(reason: String) -> DemuxError {
    DemuxError::InvalidStructure { reason }
}
