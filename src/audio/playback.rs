//! Audio playback to speakers
//!
//! Playback is a capability behind [`PlaybackSink`]; the backend is chosen
//! by configuration. Every sink plays one buffered request at a time and
//! blocks the calling turn until rendering finishes or fails.

use std::io::{Cursor, Write};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use super::samples_to_wav;
use crate::{Error, Result};

/// Encoding of a playback payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    /// Raw mono f32 samples
    Pcm,
    Wav,
    Mp3,
}

/// Why a payload is being played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackKind {
    /// Acknowledgment sound (wake chime, processing cue)
    Cue,
    /// Synthesized reply
    Reply,
    /// Spoken failure notice
    Notice,
}

/// Audio bytes or samples with enough metadata to render them
#[derive(Debug, Clone)]
pub enum AudioPayload {
    Pcm { samples: Vec<f32>, sample_rate: u32 },
    Wav(Vec<u8>),
    Mp3(Vec<u8>),
}

/// A payload handed to a [`PlaybackSink`]
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub kind: PlaybackKind,
    pub payload: AudioPayload,
}

impl PlaybackRequest {
    /// Raw mono samples
    #[must_use]
    pub const fn pcm(kind: PlaybackKind, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            kind,
            payload: AudioPayload::Pcm {
                samples,
                sample_rate,
            },
        }
    }

    /// WAV file bytes
    #[must_use]
    pub const fn wav(kind: PlaybackKind, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            payload: AudioPayload::Wav(bytes),
        }
    }

    /// MP3 bytes
    #[must_use]
    pub const fn mp3(kind: PlaybackKind, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            payload: AudioPayload::Mp3(bytes),
        }
    }

    /// Payload encoding
    #[must_use]
    pub const fn encoding(&self) -> AudioEncoding {
        match self.payload {
            AudioPayload::Pcm { .. } => AudioEncoding::Pcm,
            AudioPayload::Wav(_) => AudioEncoding::Wav,
            AudioPayload::Mp3(_) => AudioEncoding::Mp3,
        }
    }

    /// Sample rate, when known without decoding
    #[must_use]
    pub const fn sample_rate(&self) -> Option<u32> {
        match self.payload {
            AudioPayload::Pcm { sample_rate, .. } => Some(sample_rate),
            _ => None,
        }
    }

    /// Decode to mono f32 samples and their sample rate
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if the payload cannot be decoded
    pub fn into_samples(self) -> Result<(Vec<f32>, u32)> {
        match self.payload {
            AudioPayload::Pcm {
                samples,
                sample_rate,
            } => Ok((samples, sample_rate)),
            AudioPayload::Wav(bytes) => decode_wav(&bytes),
            AudioPayload::Mp3(bytes) => decode_mp3(&bytes),
        }
    }
}

/// Result of a finished playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completed {
    /// Rendered audio length
    pub duration: Duration,
}

/// Plays one request at a time to an output device
///
/// `play` takes `&mut self`, so a sink can never render two requests at once.
/// A failure part-way through must surface as `Error::Playback`, never as a
/// silent truncation.
#[async_trait]
pub trait PlaybackSink: Send {
    /// Render the request to completion
    async fn play(&mut self, request: PlaybackRequest) -> Result<Completed>;
}

/// Playback backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackBackend {
    /// Platform default
    Auto,
    /// In-process rendering through cpal
    Cpal,
    /// macOS `afplay`
    Afplay,
    /// ALSA `aplay` (WAV only; other payloads are converted first)
    Aplay,
    /// `FFmpeg`'s `ffplay`
    Ffplay,
}

impl FromStr for PlaybackBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpal" | "sounddevice" => Ok(Self::Cpal),
            "afplay" => Ok(Self::Afplay),
            "aplay" => Ok(Self::Aplay),
            "ffplay" => Ok(Self::Ffplay),
            other => Err(Error::Config(format!("unknown playback backend: {other}"))),
        }
    }
}

impl PlaybackBackend {
    /// Resolve `Auto` to a concrete backend for this platform
    #[must_use]
    pub fn resolve(self) -> Self {
        if self != Self::Auto {
            return self;
        }
        if cfg!(target_os = "macos") {
            Self::Afplay
        } else if cfg!(target_os = "linux") && which::which("aplay").is_ok() {
            Self::Aplay
        } else {
            Self::Cpal
        }
    }

    const fn program(self) -> Option<&'static str> {
        match self {
            Self::Afplay => Some("afplay"),
            Self::Aplay => Some("aplay"),
            Self::Ffplay => Some("ffplay"),
            Self::Auto | Self::Cpal => None,
        }
    }
}

/// Open the sink for a backend
///
/// # Errors
///
/// Returns error if the output device or player program is unavailable
pub fn open_sink(
    backend: PlaybackBackend,
    output_device: Option<usize>,
) -> Result<Box<dyn PlaybackSink>> {
    let backend = backend.resolve();
    tracing::debug!(?backend, "opening playback backend");
    match backend {
        PlaybackBackend::Auto | PlaybackBackend::Cpal => {
            Ok(Box::new(CpalPlayback::new(output_device)?))
        }
        other => Ok(Box::new(CommandPlayback::new(other)?)),
    }
}

/// Renders audio in-process to an output device
pub struct CpalPlayback {
    device: Device,
}

impl CpalPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(output_device: Option<usize>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match output_device {
            Some(i) => host
                .output_devices()
                .map_err(|e| Error::Device(e.to_string()))?
                .nth(i)
                .ok_or_else(|| Error::Device(format!("no output device at index {i}")))?,
            None => host
                .default_output_device()
                .ok_or_else(|| Error::Device("no output device available".to_string()))?,
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self { device })
    }
}

#[async_trait]
impl PlaybackSink for CpalPlayback {
    async fn play(&mut self, request: PlaybackRequest) -> Result<Completed> {
        let kind = request.kind;
        let (samples, sample_rate) = request.into_samples()?;
        if samples.is_empty() {
            return Ok(Completed {
                duration: Duration::ZERO,
            });
        }

        let device = self.device.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let _guard = StopOnDrop(Arc::clone(&stop));

        let duration = tokio::task::spawn_blocking(move || {
            render_blocking(&device, samples, sample_rate, &stop)
        })
        .await
        .map_err(|e| Error::Playback(format!("playback task failed: {e}")))??;

        tracing::debug!(?kind, ?duration, "playback complete");
        Ok(Completed { duration })
    }
}

/// Signals the render thread to stop when the `play` future is dropped
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Play samples in a blocking manner
#[allow(clippy::cast_precision_loss)]
fn render_blocking(
    device: &Device,
    samples: Vec<f32>,
    sample_rate: u32,
    stop: &AtomicBool,
) -> Result<Duration> {
    let (config, samples) = output_config(device, sample_rate, samples)?;
    let channels = usize::from(config.channels).max(1);
    let rate = config.sample_rate.0;
    let sample_count = samples.len();

    let finished = Arc::new(AtomicBool::new(false));
    let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let finished_cb = Arc::clone(&finished);
    let failure_cb = Arc::clone(&failure);
    let mut position = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = if let Some(&s) = samples.get(position) {
                        position += 1;
                        s
                    } else {
                        finished_cb.store(true, Ordering::Release);
                        0.0
                    };
                    frame.fill(sample);
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                if let Ok(mut slot) = failure_cb.lock() {
                    slot.get_or_insert_with(|| err.to_string());
                }
            },
            None,
        )
        .map_err(output_stream_error)?;

    stream.play().map_err(output_stream_error)?;

    let expected = Duration::from_secs_f64(sample_count as f64 / f64::from(rate));
    let deadline = Instant::now() + expected + Duration::from_secs(2);

    loop {
        if finished.load(Ordering::Acquire) {
            break;
        }
        if stop.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        if let Some(reason) = failure.lock().ok().and_then(|slot| slot.clone()) {
            return Err(Error::Playback(reason));
        }
        if Instant::now() > deadline {
            return Err(Error::Playback("playback stalled".to_string()));
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Small delay to ensure audio finishes
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    Ok(expected)
}

/// Choose an output config, resampling if the device can't run at `sample_rate`
fn output_config(
    device: &Device,
    sample_rate: u32,
    samples: Vec<f32>,
) -> Result<(StreamConfig, Vec<f32>)> {
    let supports = |channels: u16| {
        device.supported_output_configs().ok().and_then(|mut configs| {
            configs.find(|c| {
                c.channels() == channels
                    && c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
    };

    if let Some(range) = supports(1).or_else(|| supports(2)) {
        return Ok((range.with_sample_rate(SampleRate(sample_rate)).config(), samples));
    }

    let fallback = device
        .default_output_config()
        .map_err(output_stream_error)?
        .config();
    tracing::debug!(
        from = sample_rate,
        to = fallback.sample_rate.0,
        "resampling for output device"
    );
    let resampled = resample(samples, sample_rate, fallback.sample_rate.0)?;
    Ok((fallback, resampled))
}

/// Output stream failures while rendering are per-turn playback failures,
/// never capture device failures
fn output_stream_error(err: impl std::fmt::Display) -> Error {
    Error::Playback(format!("output stream: {err}"))
}

/// Resample mono audio between rates
fn resample(samples: Vec<f32>, from: u32, to: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    const CHUNK: usize = 1024;

    if from == to || samples.is_empty() {
        return Ok(samples);
    }

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, CHUNK, 2, 1)
        .map_err(|e| Error::Playback(e.to_string()))?;
    let mut out = Vec::with_capacity(samples.len() * to as usize / from as usize + CHUNK);

    let mut chunks = samples.chunks_exact(CHUNK);
    for chunk in &mut chunks {
        let waves = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Playback(e.to_string()))?;
        out.extend_from_slice(&waves[0]);
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let waves = resampler
            .process_partial(Some(&[tail]), None)
            .map_err(|e| Error::Playback(e.to_string()))?;
        out.extend_from_slice(&waves[0]);
    }

    Ok(out)
}

/// Plays through an external player program
pub struct CommandPlayback {
    backend: PlaybackBackend,
    program: &'static str,
}

impl CommandPlayback {
    /// Create a sink for an external-player backend
    ///
    /// # Errors
    ///
    /// Returns error if the backend isn't an external player or isn't on `PATH`
    pub fn new(backend: PlaybackBackend) -> Result<Self> {
        let program = backend
            .program()
            .ok_or_else(|| Error::Config(format!("{backend:?} is not an external player")))?;
        which::which(program)
            .map_err(|_| Error::Device(format!("playback program not found: {program}")))?;
        Ok(Self { backend, program })
    }

    fn args(&self, path: &std::path::Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = match self.backend {
            PlaybackBackend::Aplay => vec!["-q".into()],
            PlaybackBackend::Ffplay => ["-nodisp", "-autoexit", "-loglevel", "quiet"]
                .into_iter()
                .map(Into::into)
                .collect(),
            _ => Vec::new(),
        };
        args.push(path.as_os_str().to_owned());
        args
    }

    /// Bytes and file extension the player can read
    fn file_payload(&self, request: PlaybackRequest) -> Result<(Vec<u8>, &'static str)> {
        match (self.backend, request.payload) {
            (_, AudioPayload::Wav(bytes)) => Ok((bytes, "wav")),
            (PlaybackBackend::Aplay, payload @ AudioPayload::Mp3(_))
            | (_, payload @ AudioPayload::Pcm { .. }) => {
                let (samples, rate) = PlaybackRequest {
                    kind: request.kind,
                    payload,
                }
                .into_samples()?;
                Ok((samples_to_wav(&samples, rate)?, "wav"))
            }
            (_, AudioPayload::Mp3(bytes)) => Ok((bytes, "mp3")),
        }
    }
}

#[async_trait]
impl PlaybackSink for CommandPlayback {
    async fn play(&mut self, request: PlaybackRequest) -> Result<Completed> {
        let kind = request.kind;
        let (bytes, extension) = self.file_payload(request)?;

        let mut file = tempfile::Builder::new()
            .prefix("beacon-voice-")
            .suffix(&format!(".{extension}"))
            .tempfile()?;
        file.write_all(&bytes)?;
        file.flush()?;

        let started = Instant::now();
        let status = tokio::process::Command::new(self.program)
            .args(self.args(file.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::Playback(format!("{}: {e}", self.program)))?;

        if !status.success() {
            return Err(Error::Playback(format!(
                "{} exited with {status}",
                self.program
            )));
        }

        let duration = started.elapsed();
        tracing::debug!(?kind, program = self.program, ?duration, "playback complete");
        Ok(Completed { duration })
    }
}

/// Decode WAV bytes to mono f32 samples
fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels).max(1);

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            #[allow(clippy::cast_precision_loss)]
            let decoded = reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?;
            decoded
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok((samples, spec.sample_rate))
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                // Convert i16 samples to f32 and handle stereo to mono
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Playback("MP3 contained no frames".to_string()));
    }

    Ok((samples, sample_rate))
}
