//! CPAL-based realtime audio output.
//!
//! CPAL streams are not `Send`, so the stream lives on a dedicated
//! `audio-output` thread driven over a crossbeam channel. The audio callback
//! reads the current buffer from shared state and advances the
//! [`AudioClock`]; it never blocks on the control thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cl_common::{AudioConfig, TimeMs};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::AudioError;
use crate::mixer::AudioBuffer;
use crate::resampler::resample_buffer;
use crate::sink::AudioSink;
use crate::sync::AudioClock;

enum Command {
    Start(AudioBuffer),
    Stop,
}

#[derive(Default)]
struct PlayState {
    samples: Vec<f32>,
    position: usize,
}

/// Sink playing on the system's default output device.
pub struct DeviceSink {
    commands: Sender<Command>,
    clock: AudioClock,
    channels: u16,
    sample_rate: u32,
    thread: Option<JoinHandle<()>>,
}

impl DeviceSink {
    /// Open the default output device with the configured format.
    pub fn open(config: &AudioConfig) -> Result<Self, AudioError> {
        let clock = AudioClock::new(config.sample_rate);
        let (commands, receiver) = unbounded::<Command>();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let callback_clock = clock.clone();

        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || run_output(stream_config, callback_clock, receiver, ready_tx))
            .map_err(|e| AudioError::Output(format!("failed to spawn output thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| AudioError::Output("output thread exited during setup".to_string()))??;

        Ok(Self {
            commands,
            clock,
            channels: config.channels,
            sample_rate: config.sample_rate,
            thread: Some(thread),
        })
    }

    /// Clock advanced by the device callback.
    pub fn clock(&self) -> &AudioClock {
        &self.clock
    }
}

impl AudioSink for DeviceSink {
    fn start(&self, at: TimeMs, buffer: AudioBuffer) -> Result<(), AudioError> {
        if buffer.channels != self.channels {
            return Err(AudioError::Output(format!(
                "buffer has {} channels, device expects {}",
                buffer.channels, self.channels
            )));
        }
        let buffer = if buffer.sample_rate == self.sample_rate {
            buffer
        } else {
            AudioBuffer {
                samples: resample_buffer(
                    &buffer.samples,
                    buffer.sample_rate,
                    self.sample_rate,
                    buffer.channels,
                ),
                sample_rate: self.sample_rate,
                channels: buffer.channels,
            }
        };
        self.clock.restart(at);
        self.commands
            .send(Command::Start(buffer))
            .map_err(|_| AudioError::Output("audio output stream closed".to_string()))
    }

    fn stop(&self) {
        self.clock.stop();
        if self.commands.send(Command::Stop).is_err() {
            warn!("Audio output thread already gone");
        }
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        // Closing the channel ends the output thread.
        let (closed, _) = unbounded();
        self.commands = closed;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_output(
    config: StreamConfig,
    clock: AudioClock,
    commands: Receiver<Command>,
    ready: Sender<Result<(), AudioError>>,
) {
    let state = Arc::new(Mutex::new(PlayState::default()));
    let playing = Arc::new(AtomicBool::new(false));

    let stream = match build_stream(&config, Arc::clone(&state), Arc::clone(&playing), clock.clone())
    {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(AudioError::StreamPlay(format!("{e}"))));
        return;
    }
    let _ = ready.send(Ok(()));

    while let Ok(command) = commands.recv() {
        match command {
            Command::Start(buffer) => {
                let mut state = state.lock();
                state.samples = buffer.samples;
                state.position = 0;
                playing.store(true, Ordering::Release);
                debug!(frames = state.samples.len() / config.channels.max(1) as usize, "Device playback started");
            }
            Command::Stop => {
                playing.store(false, Ordering::Release);
                let mut state = state.lock();
                state.samples.clear();
                state.position = 0;
                debug!("Device playback stopped");
            }
        }
    }
    debug!("Audio output thread exiting");
}

fn build_stream(
    config: &StreamConfig,
    state: Arc<Mutex<PlayState>>,
    playing: Arc<AtomicBool>,
    clock: AudioClock,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::Output("No audio output device found".to_string()))?;

    info!(
        device = device
            .name()
            .unwrap_or_else(|_| "unknown".to_string())
            .as_str(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "Using audio output device"
    );

    let channels = config.channels.max(1) as u64;
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !playing.load(Ordering::Acquire) {
                    data.fill(0.0);
                    return;
                }
                let mut state = state.lock();
                let available = state.samples.len().saturating_sub(state.position);
                let n = available.min(data.len());
                let start = state.position;
                data[..n].copy_from_slice(&state.samples[start..start + n]);
                data[n..].fill(0.0);
                state.position += n;
                clock.advance(n as u64 / channels);
            },
            move |err| {
                error!(error = %err, "Audio output stream error");
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuild(format!("{e}")))
}
