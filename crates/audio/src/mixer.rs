//! Places scheduled buffers into one output buffer.
//!
//! Every [`ScheduleItem`] starts `delay` ms after the query window's start
//! (negative delays skip the head of the buffer) and is clipped to its
//! segment's slot inside the window. Buffers are resampled to the output rate
//! and up/down-mixed to the output channel count, then summed.

use crate::resampler::resample_buffer;
use crate::scheduler::ScheduleItem;

/// Interleaved f32 output of the mixer.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn silent(frames: usize, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: vec![0.0; frames * channels as usize],
            sample_rate,
            channels,
        }
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 * 1000.0 / self.sample_rate as f64
        }
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    /// Samples of one frame.
    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        let ch = self.channels as usize;
        self.samples.get(index * ch..(index + 1) * ch)
    }
}

const FRAME_EPSILON: f64 = 1e-6;

/// Mixer for one output format.
#[derive(Clone, Debug)]
pub struct AudioMixer {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count (1 = mono, 2 = stereo).
    pub channels: u16,
}

impl AudioMixer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Output frames covering `duration_ms`, rounded up. Durations within
    /// float noise of a whole frame count do not round up.
    pub fn frames_for(&self, duration_ms: f64) -> usize {
        let exact = duration_ms.max(0.0) / 1000.0 * self.sample_rate as f64;
        (exact - FRAME_EPSILON).ceil().max(0.0) as usize
    }

    fn ms_to_frame(&self, ms: f64) -> i64 {
        (ms / 1000.0 * self.sample_rate as f64).round() as i64
    }

    /// Mix `items` into a buffer of exactly `frames` frames.
    pub fn render(&self, items: &[ScheduleItem], frames: usize) -> AudioBuffer {
        let mut output = AudioBuffer::silent(frames, self.sample_rate, self.channels);
        for item in items {
            self.place(item, &mut output.samples, frames);
        }
        for sample in &mut output.samples {
            *sample = soft_clip(*sample);
        }
        output
    }

    fn place(&self, item: &ScheduleItem, output: &mut [f32], frames: usize) {
        let in_ch = item.buffer.channels as usize;
        let out_ch = self.channels as usize;
        if in_ch == 0 || out_ch == 0 {
            return;
        }

        let input = resample_buffer(
            &item.buffer.data,
            item.buffer.sample_rate,
            self.sample_rate,
            item.buffer.channels,
        );
        let resampled_frames = input.len() / in_ch;
        if resampled_frames == 0 {
            return;
        }

        // The buffer covers [delay, delay + duration) in the window. Both ends
        // are rounded to output frames so consecutive packets tile exactly.
        let first = self.ms_to_frame(item.delay);
        let last = self.ms_to_frame(item.delay + item.buffer.duration() * 1000.0);
        let span = (last - first).max(0) as usize;
        let lo = self.ms_to_frame(item.slot_start).max(0);
        let hi = self.ms_to_frame(item.slot_end).min(frames as i64);

        for j in 0..span {
            let at = first + j as i64;
            if at < lo {
                continue;
            }
            if at >= hi {
                break;
            }
            // Pad a short resampled buffer by holding its last frame.
            let k = j.min(resampled_frames - 1);
            let src = &input[k * in_ch..(k + 1) * in_ch];
            let dst = &mut output[at as usize * out_ch..(at as usize + 1) * out_ch];
            mix_frame(src, dst);
        }
    }
}

/// Add one input frame to one output frame, converting the channel layout.
fn mix_frame(src: &[f32], dst: &mut [f32]) {
    match (src.len(), dst.len()) {
        (a, b) if a == b => {
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s;
            }
        }
        (1, _) => {
            for d in dst.iter_mut() {
                *d += src[0];
            }
        }
        (n, 1) => {
            // Standard downmix: average of all channels
            dst[0] += src.iter().sum::<f32>() / n as f32;
        }
        (n, _) => {
            for (c, d) in dst.iter_mut().enumerate() {
                *d += src[c.min(n - 1)];
            }
        }
    }
}

/// Soft-clip a sample using tanh-based saturation.
///
/// Values in [-1, 1] pass through unchanged.
fn soft_clip(x: f32) -> f32 {
    if x.abs() <= 1.0 {
        x
    } else {
        x.signum() * (1.0 + (x.abs() - 1.0).tanh()) * 0.5 + x.signum() * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodedAudio;
    use crate::segment::SegmentId;
    use cl_common::SourceId;
    use cl_timeline_eval::NodeId;

    fn item(data: Vec<f32>, channels: u16, delay: f64, slot: (f64, f64)) -> ScheduleItem {
        ScheduleItem {
            buffer: DecodedAudio {
                data,
                sample_rate: 1000,
                channels,
                timestamp: 0.0,
            },
            delay,
            segment: SegmentId {
                node: NodeId(0),
                source: SourceId::new("a.wav"),
            },
            slot_start: slot.0,
            slot_end: slot.1,
        }
    }

    #[test]
    fn empty_schedule_is_silent() {
        let mixer = AudioMixer::new(1000, 2);
        let out = mixer.render(&[], 10);
        assert_eq!(out.samples.len(), 20);
        assert_eq!(out.peak(), 0.0);
        assert_eq!(out.duration_ms(), 10.0);
    }

    #[test]
    fn positive_delay_offsets_buffer() {
        let mixer = AudioMixer::new(1000, 1);
        let out = mixer.render(&[item(vec![0.5; 3], 1, 4.0, (0.0, 10.0))], 10);
        assert_eq!(
            out.samples,
            vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn negative_delay_skips_head() {
        let mixer = AudioMixer::new(1000, 1);
        let data: Vec<f32> = (0..6).map(|i| i as f32 / 10.0).collect();
        let out = mixer.render(&[item(data, 1, -3.0, (0.0, 10.0))], 4);
        assert_eq!(out.samples, vec![0.3, 0.4, 0.5, 0.0]);
    }

    #[test]
    fn clipped_to_slot() {
        let mixer = AudioMixer::new(1000, 1);
        let out = mixer.render(&[item(vec![0.5; 10], 1, 0.0, (2.0, 5.0))], 10);
        let expected: Vec<f32> = (0..10)
            .map(|i| if (2..5).contains(&i) { 0.5 } else { 0.0 })
            .collect();
        assert_eq!(out.samples, expected);
    }

    #[test]
    fn channel_conversion() {
        let mono_out = AudioMixer::new(1000, 1).render(&[item(vec![0.2, 0.6], 2, 0.0, (0.0, 1.0))], 1);
        assert!((mono_out.samples[0] - 0.4).abs() < 1e-6);

        let stereo_out = AudioMixer::new(1000, 2).render(&[item(vec![0.3], 1, 0.0, (0.0, 1.0))], 1);
        assert_eq!(stereo_out.frame(0), Some(&[0.3, 0.3][..]));
    }

    #[test]
    fn overlapping_items_sum() {
        let mixer = AudioMixer::new(1000, 1);
        let out = mixer.render(
            &[
                item(vec![0.3; 2], 1, 0.0, (0.0, 2.0)),
                item(vec![0.2; 2], 1, 0.0, (0.0, 2.0)),
            ],
            2,
        );
        assert!((out.samples[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn resampled_packets_tile_without_overlap_or_gap() {
        // 1152-frame packets at 44.1 kHz land 1253 or 1254 output frames apart.
        for (from, to) in [(44_100, 48_000), (48_000, 44_100)] {
            let mixer = AudioMixer::new(to, 1);
            let packet = 1152;
            let items: Vec<_> = (0..12)
                .map(|k| {
                    let mut it = item(vec![0.5; packet], 1, 0.0, (0.0, 1000.0));
                    it.buffer.sample_rate = from;
                    it.delay = (k * packet) as f64 * 1000.0 / from as f64;
                    it
                })
                .collect();
            let covered = (12 * packet) as f64 / from as f64 * to as f64;
            let frames = covered.floor() as usize;
            let out = mixer.render(&items, frames);
            for (i, s) in out.samples.iter().enumerate() {
                assert!((s - 0.5).abs() < 1e-6, "{from}->{to}: frame {i} is {s}");
            }
        }
    }

    #[test]
    fn soft_clip_limits_extreme_values() {
        assert_eq!(soft_clip(0.5), 0.5);
        assert!(soft_clip(5.0) < 1.5 && soft_clip(5.0) > 1.0);
        assert!(soft_clip(-5.0) > -1.5 && soft_clip(-5.0) < -1.0);
    }
}
