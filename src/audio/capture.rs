//! Audio capture from microphone

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::{AudioFrame, FrameChunker, FrameFormat, FrameQueue};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// A lazy, unbounded sequence of audio frames
///
/// `Ok(None)` means the stream ended; `Err(Error::Device)` means it failed
/// or stalled past the read timeout. Frames arrive in sequence order.
#[async_trait(?Send)]
pub trait FrameSource {
    /// Format shared by every frame of this source
    fn format(&self) -> FrameFormat;

    /// Wait for the next frame
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>>;

    /// Drop frames produced but not yet consumed, returning how many
    fn discard_pending(&mut self) -> usize;
}

/// Captures fixed-size frames from an input device
///
/// The cpal stream keeps running for the lifetime of the source; frames are
/// handed to the consumer through a bounded [`FrameQueue`]. The device is
/// released when the source is stopped or dropped.
pub struct MicrophoneSource {
    queue: Arc<FrameQueue>,
    stream: Option<Stream>,
    format: FrameFormat,
    read_timeout: Duration,
}

impl MicrophoneSource {
    /// Open the configured input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if no suitable input device can be opened
    pub fn open(config: &AudioConfig) -> Result<Self> {
        let format = config.frame_format();
        let device = input_device(config.input_device)?;
        let stream_config = input_config(&device, config.sample_rate)?;
        let channels = usize::from(stream_config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate,
            channels,
            samples_per_frame = format.samples_per_frame,
            "audio capture initialized"
        );

        let queue = Arc::new(FrameQueue::new(config.queue_frames));
        let producer = Arc::clone(&queue);
        let failure = Arc::clone(&queue);
        let mut chunker = FrameChunker::new(format, channels);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    chunker.push(data, |frame| {
                        producer.push(frame);
                    });
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                        failure.fail(err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;
        tracing::debug!("audio capture started");

        Ok(Self {
            queue,
            stream: Some(stream),
            format,
            read_timeout: config.read_timeout,
        })
    }

    /// Stop capturing and release the device
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.queue.close();
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Frames evicted because the consumer fell behind
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.queue.dropped()
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait(?Send)]
impl FrameSource for MicrophoneSource {
    fn format(&self) -> FrameFormat {
        self.format
    }

    async fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        self.queue.recv(self.read_timeout).await
    }

    fn discard_pending(&mut self) -> usize {
        self.queue.clear()
    }
}

/// An audio device as listed by [`list_devices`]
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Index usable as `audio.input_device` / `audio.output_device`
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

/// Enumerate input and output devices of the default host
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn list_devices() -> Result<(Vec<DeviceInfo>, Vec<DeviceInfo>)> {
    let host = cpal::default_host();
    let default_in = host.default_input_device().and_then(|d| d.name().ok());
    let default_out = host.default_output_device().and_then(|d| d.name().ok());

    let describe = |devices: Vec<Device>, default: Option<&String>| -> Vec<DeviceInfo> {
        devices
            .into_iter()
            .enumerate()
            .map(|(index, device)| {
                let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
                let is_default = default == Some(&name);
                DeviceInfo {
                    index,
                    name,
                    is_default,
                }
            })
            .collect()
    };

    let inputs: Vec<Device> = host
        .input_devices()
        .map_err(|e| Error::Device(e.to_string()))?
        .collect();
    let outputs: Vec<Device> = host
        .output_devices()
        .map_err(|e| Error::Device(e.to_string()))?
        .collect();

    Ok((
        describe(inputs, default_in.as_ref()),
        describe(outputs, default_out.as_ref()),
    ))
}

/// Resolve an input device by index, or the default one
fn input_device(index: Option<usize>) -> Result<Device> {
    let host = cpal::default_host();
    match index {
        Some(i) => host
            .input_devices()
            .map_err(|e| Error::Device(e.to_string()))?
            .nth(i)
            .ok_or_else(|| Error::Device(format!("no input device at index {i}"))),
        None => host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string())),
    }
}

/// Pick a stream config at `sample_rate`, preferring mono
fn input_config(device: &Device, sample_rate: u32) -> Result<StreamConfig> {
    let supported: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter(|c| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .collect();

    let chosen = supported
        .iter()
        .find(|c| c.channels() == 1)
        .or_else(|| supported.iter().min_by_key(|c| c.channels()))
        .cloned()
        .ok_or_else(|| Error::Device("no suitable audio config found".to_string()))?;

    Ok(chosen.with_sample_rate(SampleRate(sample_rate)).config())
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16)?;
        }

        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}
