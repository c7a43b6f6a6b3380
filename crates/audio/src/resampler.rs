//! Sample rate conversion using linear interpolation.
//!
//! Decoded buffers arrive at their source's rate; the mixer converts them to
//! the output rate before placing them. Linear interpolation is good enough
//! for preview and for the speech/music content of typical timelines.

/// Linear interpolation resampler for interleaved multi-channel audio.
///
/// Keeps its fractional read position across [`process`](Self::process)
/// calls so consecutive chunks of one stream join without a gap.
#[derive(Clone, Debug)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    channels: u16,
    /// Input frames consumed per output frame.
    step: f64,
    /// Read position into the next chunk, in input frames.
    position: f64,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Self {
        Self {
            from_rate,
            to_rate,
            channels,
            step: from_rate as f64 / to_rate.max(1) as f64,
            position: 0.0,
        }
    }

    /// Resample a chunk of interleaved audio.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let ch = self.channels as usize;
        if ch == 0 || input.is_empty() || self.from_rate == 0 || self.to_rate == 0 {
            return Vec::new();
        }
        if self.from_rate == self.to_rate {
            return input.to_vec();
        }

        let input_frames = input.len() / ch;
        if input_frames == 0 {
            return Vec::new();
        }

        let estimated = (input_frames as f64 / self.step).ceil() as usize + 1;
        let mut output = Vec::with_capacity(estimated * ch);

        let mut pos = self.position;
        while pos < input_frames as f64 {
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            // Hold the last frame past the end of the chunk.
            let next = (idx + 1).min(input_frames - 1);
            for c in 0..ch {
                let a = input[idx * ch + c];
                let b = input[next * ch + c];
                output.push(a + (b - a) * frac);
            }
            pos += self.step;
        }
        self.position = pos - input_frames as f64;

        output
    }

    /// Forget the read position, e.g. when switching streams.
    pub fn reset(&mut self) {
        self.position = 0.0;
    }

    /// Output frames per input frame.
    pub fn ratio(&self) -> f64 {
        self.to_rate as f64 / self.from_rate.max(1) as f64
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }
}

/// One-shot resample of a complete buffer.
pub fn resample_buffer(input: &[f32], from_rate: u32, to_rate: u32, channels: u16) -> Vec<f32> {
    Resampler::new(from_rate, to_rate, channels).process(input)
}
