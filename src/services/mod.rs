//! External collaborators: speech-to-text, reasoning backend, text-to-speech
//!
//! The turn controller only sees the traits; the HTTP implementations are
//! chosen from configuration by [`from_config`].

mod gateway;
mod local_stt;
mod stt;
mod tts;

pub use gateway::GatewayBackend;
pub use local_stt::LocalTranscriber;
pub use stt::SpeechToText;
pub use tts::TextToSpeech;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::audio::PlaybackRequest;
use crate::config::{Config, SttConfig};
use crate::error::ServiceFailure;
use crate::{Error, Result};

/// Turns a serialized utterance into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV bytes
    ///
    /// # Errors
    ///
    /// Returns `Error::Transcription` on network, auth or empty-result failure
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String>;
}

/// The remote reasoning backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Send one user message within `session` and return the reply text
    ///
    /// # Errors
    ///
    /// Returns `Error::Backend` on connection, auth or timeout failure
    async fn respond(&self, text: &str, session: &str) -> Result<String>;
}

/// Turns reply text into playable audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` with the configured voice
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` if the provider fails
    async fn synthesize(&self, text: &str) -> Result<PlaybackRequest>;
}

/// STT provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    /// On-device engine run as a subprocess, falling back to Whisper
    Local,
    Whisper,
    Deepgram,
}

impl SttProvider {
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Local => "parakeet",
            Self::Whisper => "whisper-1",
            Self::Deepgram => "nova-2",
        }
    }
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" | "fluidaudio" => Ok(Self::Local),
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown stt provider: {other}"))),
        }
    }
}

impl fmt::Display for SttProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Whisper => "whisper",
            Self::Deepgram => "deepgram",
        })
    }
}

/// TTS provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

impl TtsProvider {
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAI => "tts-1",
            Self::ElevenLabs => "eleven_turbo_v2_5",
        }
    }

    #[must_use]
    pub const fn default_voice(self) -> &'static str {
        match self {
            Self::OpenAI => "alloy",
            // "Rachel"
            Self::ElevenLabs => "21m00Tcm4TlvDq8ikWAM",
        }
    }
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" | "eleven_labs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown tts provider: {other}"))),
        }
    }
}

impl fmt::Display for TtsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenAI => "openai",
            Self::ElevenLabs => "elevenlabs",
        })
    }
}

/// The three HTTP collaborators built from configuration
pub struct Services {
    pub transcriber: Box<dyn Transcriber>,
    pub backend: Box<dyn Backend>,
    pub synthesizer: Box<dyn Synthesizer>,
}

/// Build the configured collaborators
///
/// # Errors
///
/// Returns `Error::Config` if a provider's API key is missing
pub fn from_config(config: &Config) -> Result<Services> {
    let client = http_client(config)?;
    Ok(Services {
        transcriber: transcriber_from_config(client.clone(), &config.stt)?,
        backend: Box::new(GatewayBackend::from_config(client.clone(), &config.gateway)),
        synthesizer: Box::new(TextToSpeech::from_config(client, &config.tts)?),
    })
}

/// Pick the transcriber, falling back to Whisper when the local engine is missing
///
/// # Errors
///
/// Returns `Error::Config` if the chosen remote provider has no API key
pub fn transcriber_from_config(
    client: reqwest::Client,
    config: &SttConfig,
) -> Result<Box<dyn Transcriber>> {
    if config.provider != SttProvider::Local {
        return Ok(Box::new(SpeechToText::from_config(client, config)?));
    }

    match LocalTranscriber::locate(config.binary_path.as_deref()) {
        Some(local) => Ok(Box::new(local)),
        None => {
            tracing::warn!(
                binary = ?config.binary_path,
                "local stt engine not found, falling back to Whisper"
            );
            let fallback = SttConfig {
                provider: SttProvider::Whisper,
                model: SttProvider::Whisper.default_model().to_string(),
                api_key: config
                    .api_key
                    .as_ref()
                    .map(|k| secrecy::SecretString::from(k.expose_secret().to_string())),
                binary_path: None,
            };
            Ok(Box::new(SpeechToText::from_config(client, &fallback)?))
        }
    }
}

fn http_client(config: &Config) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.turn.call_timeout)
        .build()?)
}

/// Read a response, mapping non-success statuses onto a [`ServiceFailure`]
///
/// Bodies are truncated so a provider's HTML error page doesn't flood logs.
async fn check_status(
    response: reqwest::Response,
    provider: &str,
) -> std::result::Result<reqwest::Response, ServiceFailure> {
    let status = response.status();
    tracing::debug!(provider, status = %status, "received response");
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > 512 {
        let mut end = 512;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    tracing::warn!(provider, status = %status, body = %body, "provider returned error");
    Err(ServiceFailure::from_status(status.as_u16(), body))
}

/// Require an API key, naming the provider in the error
fn require_key(
    key: Option<&secrecy::SecretString>,
    provider: &str,
) -> Result<secrecy::SecretString> {
    match key {
        Some(k) if !k.expose_secret().trim().is_empty() => {
            Ok(secrecy::SecretString::from(k.expose_secret().to_string()))
        }
        _ => Err(Error::Config(format!("{provider} API key required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("Whisper".parse::<SttProvider>().unwrap(), SttProvider::Whisper);
        assert_eq!("deepgram".parse::<SttProvider>().unwrap(), SttProvider::Deepgram);
        assert_eq!("FluidAudio".parse::<SttProvider>().unwrap(), SttProvider::Local);
        assert!("vosk".parse::<SttProvider>().is_err());

        assert_eq!("openai".parse::<TtsProvider>().unwrap(), TtsProvider::OpenAI);
        assert_eq!(
            "ElevenLabs".parse::<TtsProvider>().unwrap(),
            TtsProvider::ElevenLabs
        );
        assert!("say".parse::<TtsProvider>().is_err());
    }

    fn local_config(binary_path: Option<std::path::PathBuf>) -> SttConfig {
        SttConfig {
            provider: SttProvider::Local,
            model: SttProvider::Local.default_model().to_string(),
            api_key: None,
            binary_path,
        }
    }

    #[test]
    fn test_missing_local_engine_falls_back_to_whisper() {
        let config = local_config(Some("/nonexistent/FluidSTT".into()));
        // The fallback needs an OpenAI key, so the error names it
        let err = transcriber_from_config(reqwest::Client::new(), &config)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(msg) if msg.contains("OpenAI")));

        let config = SttConfig {
            api_key: Some(secrecy::SecretString::from("sk-test")),
            ..local_config(Some("/nonexistent/FluidSTT".into()))
        };
        assert!(transcriber_from_config(reqwest::Client::new(), &config).is_ok());
    }

    #[test]
    fn test_present_local_engine_needs_no_key() {
        let binary = tempfile::NamedTempFile::new().unwrap();
        let config = local_config(Some(binary.path().to_path_buf()));
        assert!(transcriber_from_config(reqwest::Client::new(), &config).is_ok());
    }

    #[test]
    fn test_require_key() {
        assert!(require_key(None, "OpenAI").is_err());

        let blank = secrecy::SecretString::from("  ");
        assert!(require_key(Some(&blank), "OpenAI").is_err());

        let key = secrecy::SecretString::from("sk-test");
        assert!(require_key(Some(&key), "OpenAI").is_ok());
    }
}
