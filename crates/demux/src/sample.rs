//! Sample table: maps presentation times to samples and samples to their
//! nearest preceding sync sample.
//!
//! Entries are kept in decode order. A second index sorted by composition
//! time serves presentation lookups, so streams with reordered (B) frames
//! resolve the sample actually displayed at a given time.

use cl_common::{DemuxError, TimeMs};
use tracing::debug;

/// Flat entry for a single sample.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleEntry {
    /// 0-based index in decode order.
    pub index: usize,
    /// Byte size of the sample data.
    pub size: u32,
    /// Decoding timestamp in media timescale units.
    pub dts: u64,
    /// Composition (presentation) timestamp in media timescale units.
    pub cts: i64,
    /// Presentation duration in media timescale units.
    pub duration: u32,
    /// Whether this sample is a sync sample (keyframe).
    pub is_sync: bool,
}

/// Pre-computed sample table for a video track.
#[derive(Clone, Debug)]
pub struct SampleTable {
    samples: Vec<SampleEntry>,
    /// Media timescale (ticks per second).
    timescale: u32,
    /// Decode indices ordered by composition time.
    presentation: Vec<usize>,
    /// Position of each decode index inside `presentation`.
    rank: Vec<usize>,
}

impl SampleTable {
    /// Build a table from entries in decode order.
    pub fn new(samples: Vec<SampleEntry>, timescale: u32) -> Result<Self, DemuxError> {
        if timescale == 0 {
            return Err(DemuxError::InvalidStructure {
                reason: "timescale is zero".into(),
            });
        }
        if samples.is_empty() {
            return Err(DemuxError::EmptyTrack);
        }
        if let Some((pos, entry)) = samples.iter().enumerate().find(|(i, s)| s.index != *i) {
            return Err(DemuxError::InvalidStructure {
                reason: format!("sample at position {pos} has index {}", entry.index),
            });
        }

        let mut presentation: Vec<usize> = (0..samples.len()).collect();
        presentation.sort_by_key(|&i| (samples[i].cts, i));
        let mut rank = vec![0; samples.len()];
        for (pos, &i) in presentation.iter().enumerate() {
            rank[i] = pos;
        }

        let sync_count = samples.iter().filter(|s| s.is_sync).count();
        debug!(
            samples = samples.len(),
            sync_samples = sync_count,
            timescale,
            "Built sample table"
        );

        Ok(Self {
            samples,
            timescale,
            presentation,
            rank,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    pub fn get(&self, index: usize) -> Option<&SampleEntry> {
        self.samples.get(index)
    }

    pub fn entry(&self, index: usize) -> Result<&SampleEntry, DemuxError> {
        self.samples.get(index).ok_or(DemuxError::SampleOutOfRange {
            index,
            count: self.samples.len(),
        })
    }

    /// Convert timescale ticks to milliseconds.
    pub fn ticks_to_ms(&self, ticks: i64) -> TimeMs {
        TimeMs(ticks as f64 * 1000.0 / self.timescale as f64)
    }

    /// Presentation timestamp of a sample.
    pub fn timestamp(&self, index: usize) -> Option<TimeMs> {
        self.samples.get(index).map(|s| self.ticks_to_ms(s.cts))
    }

    /// Presentation duration of a sample.
    pub fn duration(&self, index: usize) -> Option<TimeMs> {
        self.samples
            .get(index)
            .map(|s| self.ticks_to_ms(s.duration as i64))
    }

    /// End of the last presented sample.
    pub fn total_duration(&self) -> TimeMs {
        let end = self
            .samples
            .iter()
            .map(|s| s.cts + s.duration as i64)
            .max()
            .unwrap_or(0);
        self.ticks_to_ms(end)
    }

    /// Decode index of the sample displayed at `t`.
    ///
    /// That is the last sample in presentation order starting at or before
    /// `t`. Times before the first sample resolve to the first sample; times
    /// past the end hold the last one.
    pub fn find_sample_at(&self, t: TimeMs) -> Option<usize> {
        let first = *self.presentation.first()?;
        let after = self
            .presentation
            .partition_point(|&i| self.ticks_to_ms(self.samples[i].cts) <= t);
        if after == 0 {
            Some(first)
        } else {
            Some(self.presentation[after - 1])
        }
    }

    /// Nearest sync sample at or before `index` in decode order.
    ///
    /// Falls back to the first sample when the stream does not start with a
    /// sync sample.
    pub fn find_sync_at_or_before(&self, index: usize) -> Option<usize> {
        if index >= self.samples.len() {
            return None;
        }
        Some(
            self.samples[..=index]
                .iter()
                .rposition(|s| s.is_sync)
                .unwrap_or(0),
        )
    }

    /// Sample presented right after `index`, if any.
    pub fn next_in_presentation(&self, index: usize) -> Option<usize> {
        let rank = *self.rank.get(index)?;
        self.presentation.get(rank + 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1000-tick timescale, 40ms frames, key every `gop` samples, no reordering.
    fn linear_table(count: usize, gop: usize) -> SampleTable {
        let samples = (0..count)
            .map(|i| SampleEntry {
                index: i,
                size: 16,
                dts: i as u64 * 40,
                cts: i as i64 * 40,
                duration: 40,
                is_sync: i % gop == 0,
            })
            .collect();
        SampleTable::new(samples, 1000).unwrap()
    }

    // ── presentation lookup ──

    #[test]
    fn sample_at_time() {
        let table = linear_table(10, 5);
        assert_eq!(table.find_sample_at(TimeMs(0.0)), Some(0));
        assert_eq!(table.find_sample_at(TimeMs(39.9)), Some(0));
        assert_eq!(table.find_sample_at(TimeMs(40.0)), Some(1));
        assert_eq!(table.find_sample_at(TimeMs(215.0)), Some(5));
    }

    #[test]
    fn sample_at_time_clamps() {
        let table = linear_table(10, 5);
        assert_eq!(table.find_sample_at(TimeMs(-100.0)), Some(0));
        assert_eq!(table.find_sample_at(TimeMs(10_000.0)), Some(9));
        assert_eq!(table.total_duration(), TimeMs(400.0));
    }

    #[test]
    fn reordered_frames_follow_composition_time() {
        // decode order I P B, presentation order I B P
        let samples = vec![
            SampleEntry { index: 0, size: 1, dts: 0, cts: 0, duration: 40, is_sync: true },
            SampleEntry { index: 1, size: 1, dts: 40, cts: 80, duration: 40, is_sync: false },
            SampleEntry { index: 2, size: 1, dts: 80, cts: 40, duration: 40, is_sync: false },
        ];
        let table = SampleTable::new(samples, 1000).unwrap();
        assert_eq!(table.find_sample_at(TimeMs(50.0)), Some(2));
        assert_eq!(table.find_sample_at(TimeMs(90.0)), Some(1));
        assert_eq!(table.next_in_presentation(0), Some(2));
        assert_eq!(table.next_in_presentation(2), Some(1));
        assert_eq!(table.next_in_presentation(1), None);
    }

    // ── sync lookup ──

    #[test]
    fn sync_at_or_before() {
        let table = linear_table(12, 5);
        assert_eq!(table.find_sync_at_or_before(0), Some(0));
        assert_eq!(table.find_sync_at_or_before(4), Some(0));
        assert_eq!(table.find_sync_at_or_before(5), Some(5));
        assert_eq!(table.find_sync_at_or_before(11), Some(10));
        assert_eq!(table.find_sync_at_or_before(12), None);
    }

    // ── construction ──

    #[test]
    fn rejects_bad_tables() {
        assert!(matches!(
            SampleTable::new(Vec::new(), 1000),
            Err(DemuxError::EmptyTrack)
        ));
        let one = vec![SampleEntry { index: 0, size: 1, dts: 0, cts: 0, duration: 1, is_sync: true }];
        assert!(SampleTable::new(one.clone(), 0).is_err());
        let misnumbered = vec![SampleEntry { index: 3, ..one[0].clone() }];
        assert!(SampleTable::new(misnumbered, 1000).is_err());
    }

    #[test]
    fn timestamps_in_ms() {
        let table = linear_table(3, 3);
        assert_eq!(table.timestamp(2), Some(TimeMs(80.0)));
        assert_eq!(table.duration(2), Some(TimeMs(40.0)));
        assert!(table.entry(3).is_err());
    }
}
