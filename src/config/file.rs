//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-voice/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Wake phrase detection
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Voice activity detection and endpointing
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Capture, playback and cue settings
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Speech-to-text provider
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech provider
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Reasoning backend
    #[serde(default)]
    pub gateway: GatewayFileConfig,

    /// Turn-level behavior
    #[serde(default)]
    pub turn: TurnFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Wake phrase (e.g. "hey beacon")
    pub phrase: Option<String>,
    /// Model score at or above which a frame triggers
    pub threshold: Option<f32>,
    /// Re-trigger suppression window in milliseconds
    pub cooldown_ms: Option<u64>,
    /// Contiguous loud frames the energy model needs before firing
    pub min_active_frames: Option<usize>,
    /// Trained rustpotter wake word model
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    /// Speech probability threshold (0-1)
    pub threshold: Option<f32>,
    /// Seconds of trailing silence before stopping
    pub silence_timeout_sec: Option<f64>,
    /// Hard ceiling on recording length
    pub max_recording_sec: Option<f64>,
    /// Frames after an unconditional start that count as speech
    pub grace_ms: Option<u64>,
    /// Contiguous speech frames needed to leave `Armed`
    pub start_debounce_frames: Option<usize>,
    /// Give up if no speech starts within this many seconds
    pub no_speech_timeout_sec: Option<f64>,
    /// Audio kept before speech onset
    pub pre_roll_ms: Option<u64>,
    /// Start recording at the wake event rather than at the first speech
    pub start_on_wake: Option<bool>,
    /// "energy" or "silero"
    pub engine: Option<String>,
    /// Silero ONNX model
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_ms: Option<u32>,
    pub input_device: Option<usize>,
    pub output_device: Option<usize>,
    pub queue_frames: Option<usize>,
    pub read_timeout_ms: Option<u64>,
    /// "auto", "cpal", "afplay", "aplay" or "ffplay"
    pub playback_backend: Option<String>,
    pub chime_on_wake: Option<bool>,
    pub processing_cue: Option<bool>,
    pub chime_path: Option<PathBuf>,
    pub processing_cue_path: Option<PathBuf>,
    pub min_utterance_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "local", "whisper" or "deepgram"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// Local transcription binary
    pub binary_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai" or "elevenlabs"
    pub provider: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub speed: Option<f32>,
    pub stability: Option<f32>,
    pub similarity_boost: Option<f32>,
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GatewayFileConfig {
    /// Base URL of an OpenAI-compatible chat completions endpoint
    pub url: Option<String>,
    pub token: Option<String>,
    pub agent: Option<String>,
    pub model: Option<String>,
    /// Session identifier sent with every request
    pub session: Option<String>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TurnFileConfig {
    pub call_timeout_sec: Option<f64>,
    pub announce_failures: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ConfigFile::default()
        }
    }
}

/// Read and parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/omni/beacon-voice/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-voice")
            .join("config.toml")
    })
}
