//! Audio decoding for timeline segments.
//!
//! A [`SegmentDecoder`] returns the decoded buffers covering a millisecond
//! range of its source. [`SymphoniaDecoder`] wraps Symphonia and decodes
//! AAC, MP3, WAV and PCM from in-memory bytes; [`PcmDecoder`] serves
//! already-decoded samples.

use std::io::Cursor;
use std::sync::Arc;

use cl_common::{AssetStore, CancelToken, SourceId};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::{FormatOptions, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::{debug, warn};

use crate::error::AudioError;

/// Decoded audio samples in f32 interleaved format.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved f32 samples.
    pub data: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
    /// Source time of the first sample, in seconds.
    pub timestamp: f64,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels as usize
        }
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    pub fn end(&self) -> f64 {
        self.timestamp + self.duration()
    }
}

/// Decodes ranges of one audio source.
pub trait SegmentDecoder: Send {
    /// Buffers covering `[start_ms, end_ms)` of the source, in order.
    ///
    /// The first buffer may begin before `start_ms`; decoding stops at the
    /// first buffer reaching `end_ms`. `cancel` is checked between packets.
    fn decode_range(
        &mut self,
        start_ms: f64,
        end_ms: f64,
        cancel: &CancelToken,
    ) -> Result<Vec<DecodedAudio>, AudioError>;
}

/// Creates decoders for audio sources.
pub trait AudioDecoderFactory: Send + Sync {
    fn create(&self, source: &SourceId) -> Result<Box<dyn SegmentDecoder>, AudioError>;
}

impl<F> AudioDecoderFactory for F
where
    F: Fn(&SourceId) -> Result<Box<dyn SegmentDecoder>, AudioError> + Send + Sync,
{
    fn create(&self, source: &SourceId) -> Result<Box<dyn SegmentDecoder>, AudioError> {
        self(source)
    }
}

/// Opens sources from an asset store with Symphonia.
pub struct AssetAudioDecoderFactory {
    assets: Arc<dyn AssetStore>,
}

impl AssetAudioDecoderFactory {
    pub fn new(assets: Arc<dyn AssetStore>) -> Self {
        Self { assets }
    }
}

impl AudioDecoderFactory for AssetAudioDecoderFactory {
    fn create(&self, source: &SourceId) -> Result<Box<dyn SegmentDecoder>, AudioError> {
        let bytes = self.assets.get_file(source.as_str())?;
        let extension = source.as_str().rsplit_once('.').map(|(_, ext)| ext);
        Ok(Box::new(SymphoniaDecoder::open(bytes, extension)?))
    }
}

/// Gap after the previous range still treated as sequential reading (s).
const CONTIGUOUS_SLACK: f64 = 0.05;

/// Audio decoder backed by Symphonia.
pub struct SymphoniaDecoder {
    reader: Box<dyn symphonia::core::formats::FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    /// Last buffer of the previous range. A range starting inside it (or
    /// right after it) continues reading instead of seeking.
    tail: Option<DecodedAudio>,
    seeks: u64,
}

impl SymphoniaDecoder {
    /// Probe `bytes` and prepare a decoder for the first audio track.
    pub fn open(bytes: Vec<u8>, extension: Option<&str>) -> Result<Self, AudioError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| AudioError::UnsupportedFormat(format!("{e}")))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| {
                t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL
                    && t.codec_params.channels.is_some()
            })
            .ok_or(AudioError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| AudioError::Decode("No sample rate in codec params".to_string()))?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| AudioError::Decode("No channel info in codec params".to_string()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::UnsupportedFormat(format!("Codec init failed: {e}")))?;

        debug!(
            codec = ?codec_params.codec,
            sample_rate,
            channels,
            "Opened audio source"
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            tail: None,
            seeks: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of container seeks performed so far.
    pub fn seeks(&self) -> u64 {
        self.seeks
    }

    fn seek(&mut self, secs: f64) -> Result<(), AudioError> {
        let seek_to = SeekTo::Time {
            time: Time::from(secs),
            track_id: Some(self.track_id),
        };
        self.reader
            .seek(SeekMode::Coarse, seek_to)
            .map_err(|e| AudioError::Seek {
                time: secs,
                reason: format!("{e}"),
            })?;
        self.decoder.reset();
        self.seeks += 1;
        Ok(())
    }

    /// Decode the next packet; `Ok(None)` at end of stream.
    fn decode_next(&mut self) -> Result<Option<DecodedAudio>, AudioError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(AudioError::Decode(format!("{e}"))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }
            let ts = packet.ts();

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(symphonia::core::errors::Error::DecodeError(msg)) => {
                    warn!(error = %msg, "Skipping corrupted audio packet");
                    continue;
                }
                Err(e) => return Err(AudioError::Decode(format!("{e}"))),
            };

            let spec = *decoded.spec();
            let num_frames = decoded.frames();
            if num_frames == 0 {
                continue;
            }
            let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            let timestamp = match self
                .reader
                .tracks()
                .iter()
                .find(|t| t.id == self.track_id)
                .and_then(|t| t.codec_params.time_base)
            {
                Some(tb) => {
                    let time = tb.calc_time(ts);
                    time.seconds as f64 + time.frac
                }
                None => ts as f64 / self.sample_rate as f64,
            };

            return Ok(Some(DecodedAudio {
                data: sample_buf.samples().to_vec(),
                sample_rate: spec.rate,
                channels: spec.channels.count() as u16,
                timestamp,
            }));
        }
    }
}

impl SegmentDecoder for SymphoniaDecoder {
    fn decode_range(
        &mut self,
        start_ms: f64,
        end_ms: f64,
        cancel: &CancelToken,
    ) -> Result<Vec<DecodedAudio>, AudioError> {
        let start = start_ms / 1000.0;
        let end = end_ms / 1000.0;

        let mut out = Vec::new();
        match self.tail.take() {
            Some(tail) if start >= tail.timestamp && start < tail.end() + CONTIGUOUS_SLACK => {
                if tail.end() > start {
                    if tail.end() >= end {
                        out.push(tail.clone());
                        self.tail = Some(tail);
                        return Ok(out);
                    }
                    out.push(tail);
                }
            }
            _ => self.seek(start)?,
        }

        while let Some(buffer) = self.decode_next()? {
            if cancel.is_cancelled() {
                return Err(AudioError::Cancelled);
            }
            if buffer.end() <= start {
                continue;
            }
            if buffer.end() >= end {
                self.tail = Some(buffer.clone());
                out.push(buffer);
                break;
            }
            out.push(buffer);
        }
        Ok(out)
    }
}

/// Serves interleaved samples held in memory, in fixed-size packets.
#[derive(Clone, Debug)]
pub struct PcmDecoder {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    channels: u16,
    packet_frames: usize,
}

impl PcmDecoder {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, packet_frames: usize) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
            channels,
            packet_frames: packet_frames.max(1),
        }
    }

    /// `duration_ms` of a constant `value` on every channel.
    pub fn constant(value: f32, duration_ms: f64, sample_rate: u32, channels: u16) -> Self {
        let frames = (duration_ms / 1000.0 * sample_rate as f64).round() as usize;
        Self::new(
            vec![value; frames * channels as usize],
            sample_rate,
            channels,
            1024,
        )
    }

    fn total_frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

impl SegmentDecoder for PcmDecoder {
    fn decode_range(
        &mut self,
        start_ms: f64,
        end_ms: f64,
        cancel: &CancelToken,
    ) -> Result<Vec<DecodedAudio>, AudioError> {
        let rate = self.sample_rate as f64;
        let ch = self.channels.max(1) as usize;
        let first = ((start_ms.max(0.0) / 1000.0 * rate) as usize / self.packet_frames)
            * self.packet_frames;
        let end_frame = ((end_ms / 1000.0 * rate).ceil() as usize).min(self.total_frames());

        let mut out = Vec::new();
        let mut frame = first;
        while frame < end_frame {
            if cancel.is_cancelled() {
                return Err(AudioError::Cancelled);
            }
            let len = self.packet_frames.min(self.total_frames() - frame);
            out.push(DecodedAudio {
                data: self.samples[frame * ch..(frame + len) * ch].to_vec(),
                sample_rate: self.sample_rate,
                channels: self.channels,
                timestamp: frame as f64 / rate,
            });
            frame += len;
        }
        Ok(out)
    }
}
