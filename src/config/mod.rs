//! Configuration for Beacon voice
//!
//! The core only ever sees a validated [`Config`]. Loading follows
//! env > TOML file > defaults.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::audio::{FrameFormat, PlaybackBackend};
use crate::services::{SttProvider, TtsProvider};
use crate::vad::VadEngine;
use crate::{Error, Result};

pub use file::ConfigFile;

/// Beacon voice configuration
#[derive(Debug)]
pub struct Config {
    /// Wake phrase detection
    pub wake: WakeConfig,

    /// Voice activity detection and endpointing
    pub vad: VadConfig,

    /// Capture, playback and cue settings
    pub audio: AudioConfig,

    /// Speech-to-text provider
    pub stt: SttConfig,

    /// Text-to-speech provider
    pub tts: TtsConfig,

    /// Reasoning backend
    pub gateway: GatewayConfig,

    /// Turn-level behavior
    pub turn: TurnConfig,
}

/// Wake phrase configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Wake phrase, lowercase and trimmed
    pub phrase: String,

    /// Model score at or above which a frame counts as a trigger
    pub threshold: f32,

    /// Repeated triggers within this window after a wake event are suppressed
    pub cooldown: Duration,

    /// Contiguous loud frames the energy model needs before firing
    pub min_active_frames: usize,

    /// Trained rustpotter model (`.rpw`); the energy gate is used when unset
    pub model_path: Option<PathBuf>,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrase: "hey beacon".to_string(),
            threshold: 0.5,
            cooldown: Duration::from_secs(1),
            min_active_frames: 8,
            model_path: None,
        }
    }
}

/// Endpointing configuration
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Speech probability at or above which a frame is speech
    pub threshold: f32,

    /// Trailing silence that ends an utterance
    pub silence_timeout: Duration,

    /// Hard ceiling on recorded duration
    pub max_recording: Duration,

    /// After an unconditional start, frames within this window count as speech
    pub grace: Duration,

    /// Contiguous speech frames needed to leave `Armed` (1 disables debounce)
    pub start_debounce_frames: usize,

    /// Give up if `Armed` lasts this long
    pub no_speech_timeout: Duration,

    /// Audio kept while `Armed` and flushed into the utterance at speech onset
    pub pre_roll: Duration,

    /// Treat the wake event as the start of speech instead of waiting in `Armed`
    pub start_on_wake: bool,

    /// Speech detector producing the per-frame probability
    pub engine: VadEngine,

    /// ONNX model for the Silero engine
    pub model_path: Option<PathBuf>,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            silence_timeout: Duration::from_millis(1500),
            max_recording: Duration::from_secs(30),
            grace: Duration::from_millis(300),
            start_debounce_frames: 3,
            no_speech_timeout: Duration::from_secs(5),
            pre_roll: Duration::from_millis(500),
            start_on_wake: true,
            engine: VadEngine::Energy,
            model_path: None,
        }
    }
}

/// Audio device and cue configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Frame length in milliseconds
    pub frame_ms: u32,

    /// Input device index (default device when unset)
    pub input_device: Option<usize>,

    /// Output device index (default device when unset)
    pub output_device: Option<usize>,

    /// Capacity of the capture queue in frames
    pub queue_frames: usize,

    /// Longest wait for the next frame before the device is considered stalled
    pub read_timeout: Duration,

    /// Playback backend selection
    pub playback_backend: PlaybackBackend,

    /// Play a chime when the wake phrase is detected
    pub chime_on_wake: bool,

    /// Play a short cue before waiting on the backend
    pub processing_cue: bool,

    /// WAV file to use instead of the synthesized wake chime
    pub chime_path: Option<PathBuf>,

    /// WAV file to use instead of the synthesized processing cue
    pub processing_cue_path: Option<PathBuf>,

    /// Utterances shorter than this are ignored
    pub min_utterance: Duration,
}

impl AudioConfig {
    /// Frame format implied by the sample rate and frame length
    #[must_use]
    pub fn frame_format(&self) -> FrameFormat {
        FrameFormat::from_millis(self.sample_rate, self.frame_ms)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_ms: 32,
            input_device: None,
            output_device: None,
            queue_frames: 256,
            read_timeout: Duration::from_secs(1),
            playback_backend: PlaybackBackend::Auto,
            chime_on_wake: true,
            processing_cue: true,
            chime_path: None,
            processing_cue_path: None,
            min_utterance: Duration::from_millis(500),
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub model: String,
    pub api_key: Option<SecretString>,
    /// Local transcription binary; looked up on `PATH` when unset
    pub binary_path: Option<PathBuf>,
}

/// Text-to-speech configuration
#[derive(Debug)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    /// Voice name (`OpenAI`) or voice ID (`ElevenLabs`)
    pub voice: String,
    pub model: String,
    /// Speed multiplier (`OpenAI` only)
    pub speed: f32,
    /// Voice stability (`ElevenLabs` only)
    pub stability: f32,
    /// Similarity boost (`ElevenLabs` only)
    pub similarity_boost: f32,
    pub api_key: Option<SecretString>,
}

/// Reasoning backend configuration
#[derive(Debug)]
pub struct GatewayConfig {
    /// Base URL of an OpenAI-compatible chat completions endpoint
    pub url: String,
    pub token: Option<SecretString>,
    /// Agent that handles voice turns, sent as `x-openclaw-agent-id`
    pub agent: String,
    /// Model name; `openclaw:<agent>` unless configured
    pub model: String,
    /// Session identifier sent with every request
    pub session: String,
    /// System prompt prepended to every request
    pub system_prompt: Option<String>,
}

/// Turn-level configuration
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Timeout applied to each STT, backend and TTS call
    pub call_timeout: Duration,

    /// Speak the failure notice after a backend failure
    pub announce_failures: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            announce_failures: true,
        }
    }
}

impl Config {
    /// Load configuration from the standard path or an explicit file
    ///
    /// # Errors
    ///
    /// Returns error if an explicit file cannot be read or the result is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(p) => file::read_config_file(p)?,
            None => file::load_config_file(),
        };
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a config file with environment overrides and validate
    ///
    /// `env` looks up a variable by name so tests can avoid the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if any value is out of range
    #[allow(clippy::too_many_lines)]
    pub fn resolve(fc: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let wake_default = WakeConfig::default();
        let wake = WakeConfig {
            phrase: env("BEACON_VOICE_WAKE_PHRASE")
                .or(fc.wake.phrase)
                .map_or(wake_default.phrase, |p| p.trim().to_lowercase()),
            threshold: fc.wake.threshold.unwrap_or(wake_default.threshold),
            cooldown: fc
                .wake
                .cooldown_ms
                .map_or(wake_default.cooldown, Duration::from_millis),
            min_active_frames: fc
                .wake
                .min_active_frames
                .unwrap_or(wake_default.min_active_frames),
            model_path: env("BEACON_VOICE_WAKE_MODEL")
                .map(PathBuf::from)
                .or(fc.wake.model_path)
                .map(|p| expand_home(&p)),
        };

        let vad_default = VadConfig::default();
        let vad = VadConfig {
            threshold: fc.vad.threshold.unwrap_or(vad_default.threshold),
            silence_timeout: fc
                .vad
                .silence_timeout_sec
                .map(|v| seconds("vad.silence_timeout_sec", v))
                .transpose()?
                .unwrap_or(vad_default.silence_timeout),
            max_recording: fc
                .vad
                .max_recording_sec
                .map(|v| seconds("vad.max_recording_sec", v))
                .transpose()?
                .unwrap_or(vad_default.max_recording),
            grace: fc.vad.grace_ms.map_or(vad_default.grace, Duration::from_millis),
            start_debounce_frames: fc
                .vad
                .start_debounce_frames
                .unwrap_or(vad_default.start_debounce_frames),
            no_speech_timeout: fc
                .vad
                .no_speech_timeout_sec
                .map(|v| seconds("vad.no_speech_timeout_sec", v))
                .transpose()?
                .unwrap_or(vad_default.no_speech_timeout),
            pre_roll: fc
                .vad
                .pre_roll_ms
                .map_or(vad_default.pre_roll, Duration::from_millis),
            start_on_wake: fc.vad.start_on_wake.unwrap_or(vad_default.start_on_wake),
            engine: match fc.vad.engine {
                Some(name) => name.parse()?,
                None if fc.vad.model_path.is_some() => VadEngine::Silero,
                None => vad_default.engine,
            },
            model_path: fc.vad.model_path.map(|p| expand_home(&p)),
        };

        let audio_default = AudioConfig::default();
        let playback_backend = match env("BEACON_VOICE_PLAYBACK_BACKEND").or(fc.audio.playback_backend)
        {
            Some(name) => name.parse()?,
            None => audio_default.playback_backend,
        };
        let audio = AudioConfig {
            sample_rate: fc.audio.sample_rate.unwrap_or(audio_default.sample_rate),
            frame_ms: fc.audio.frame_ms.unwrap_or(audio_default.frame_ms),
            input_device: env("BEACON_VOICE_INPUT_DEVICE")
                .and_then(|s| s.parse().ok())
                .or(fc.audio.input_device),
            output_device: env("BEACON_VOICE_OUTPUT_DEVICE")
                .and_then(|s| s.parse().ok())
                .or(fc.audio.output_device),
            queue_frames: fc.audio.queue_frames.unwrap_or(audio_default.queue_frames),
            read_timeout: fc
                .audio
                .read_timeout_ms
                .map_or(audio_default.read_timeout, Duration::from_millis),
            playback_backend,
            chime_on_wake: fc.audio.chime_on_wake.unwrap_or(audio_default.chime_on_wake),
            processing_cue: fc
                .audio
                .processing_cue
                .unwrap_or(audio_default.processing_cue),
            chime_path: fc.audio.chime_path,
            processing_cue_path: fc.audio.processing_cue_path,
            min_utterance: fc
                .audio
                .min_utterance_ms
                .map_or(audio_default.min_utterance, Duration::from_millis),
        };

        let stt_provider = match fc.stt.provider {
            Some(name) => name.parse()?,
            None => SttProvider::Local,
        };
        // The local engine falls back to Whisper, so it reads the OpenAI key
        let stt_key_var = match stt_provider {
            SttProvider::Local | SttProvider::Whisper => "OPENAI_API_KEY",
            SttProvider::Deepgram => "DEEPGRAM_API_KEY",
        };
        let stt = SttConfig {
            provider: stt_provider,
            model: fc.stt.model.unwrap_or_else(|| stt_provider.default_model().to_string()),
            api_key: env(stt_key_var).or(fc.stt.api_key).map(SecretString::from),
            binary_path: env("BEACON_VOICE_STT_BINARY")
                .map(PathBuf::from)
                .or(fc.stt.binary_path)
                .map(|p| expand_home(&p)),
        };

        let tts_provider = match fc.tts.provider {
            Some(name) => name.parse()?,
            None => TtsProvider::OpenAI,
        };
        let tts_key_var = match tts_provider {
            TtsProvider::OpenAI => "OPENAI_API_KEY",
            TtsProvider::ElevenLabs => "ELEVENLABS_API_KEY",
        };
        let tts = TtsConfig {
            provider: tts_provider,
            voice: fc
                .tts
                .voice
                .unwrap_or_else(|| tts_provider.default_voice().to_string()),
            model: fc
                .tts
                .model
                .unwrap_or_else(|| tts_provider.default_model().to_string()),
            speed: fc.tts.speed.unwrap_or(1.0),
            stability: fc.tts.stability.unwrap_or(0.6),
            similarity_boost: fc.tts.similarity_boost.unwrap_or(0.8),
            api_key: env(tts_key_var).or(fc.tts.api_key).map(SecretString::from),
        };

        let agent = env("BEACON_VOICE_AGENT")
            .or(fc.gateway.agent)
            .unwrap_or_else(|| "beacon".to_string());
        let gateway = GatewayConfig {
            url: env("BEACON_VOICE_GATEWAY_URL")
                .or(fc.gateway.url)
                .unwrap_or_else(|| "http://127.0.0.1:18789".to_string()),
            token: env("BEACON_VOICE_GATEWAY_TOKEN")
                .or(fc.gateway.token)
                .map(SecretString::from),
            model: fc
                .gateway
                .model
                .unwrap_or_else(|| format!("openclaw:{agent}")),
            agent,
            session: env("BEACON_VOICE_SESSION")
                .or(fc.gateway.session)
                .unwrap_or_else(|| format!("voice-{}", uuid::Uuid::new_v4())),
            system_prompt: fc.gateway.system_prompt,
        };

        let turn_default = TurnConfig::default();
        let turn = TurnConfig {
            call_timeout: fc
                .turn
                .call_timeout_sec
                .map(|v| seconds("turn.call_timeout_sec", v))
                .transpose()?
                .unwrap_or(turn_default.call_timeout),
            announce_failures: fc
                .turn
                .announce_failures
                .unwrap_or(turn_default.announce_failures),
        };

        let config = Self {
            wake,
            vad,
            audio,
            stt,
            tts,
            gateway,
            turn,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        probability("wake.threshold", self.wake.threshold)?;
        probability("vad.threshold", self.vad.threshold)?;

        if self.wake.phrase.is_empty() {
            return Err(Error::Config("wake.phrase must not be empty".to_string()));
        }
        if self.audio.sample_rate == 0 || self.audio.frame_ms == 0 {
            return Err(Error::Config(
                "audio.sample_rate and audio.frame_ms must be positive".to_string(),
            ));
        }
        if self.audio.frame_format().samples_per_frame == 0 {
            return Err(Error::Config("frame is shorter than one sample".to_string()));
        }
        if self.audio.queue_frames == 0 {
            return Err(Error::Config("audio.queue_frames must be positive".to_string()));
        }
        if self.vad.max_recording < self.vad.silence_timeout {
            return Err(Error::Config(
                "vad.max_recording_sec must be at least vad.silence_timeout_sec".to_string(),
            ));
        }
        if self.audio.read_timeout.is_zero() {
            return Err(Error::Config("audio.read_timeout_ms must be positive".to_string()));
        }
        if self.vad.engine == VadEngine::Silero && self.vad.model_path.is_none() {
            return Err(Error::Config(
                "vad.model_path is required for the silero engine".to_string(),
            ));
        }
        if self.gateway.agent.trim().is_empty() {
            return Err(Error::Config("gateway.agent must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Convert a positive, finite number of seconds to a `Duration`
fn seconds(field: &str, value: f64) -> Result<Duration> {
    let invalid = || Error::Config(format!("{field} must be a positive number of seconds"));
    if value > 0.0 {
        Duration::try_from_secs_f64(value).map_err(|_| invalid())
    } else {
        Err(invalid())
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => directories::BaseDirs::new()
            .map_or_else(|| path.to_path_buf(), |d| d.home_dir().join(rest)),
        Err(_) => path.to_path_buf(),
    }
}

fn probability(field: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{field} must be within [0, 1]")))
    }
}
