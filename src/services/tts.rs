//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{Synthesizer, TtsProvider, check_status, require_key};
use crate::audio::{PlaybackKind, PlaybackRequest};
use crate::config::TtsConfig;
use crate::error::ServiceFailure;
use crate::{Error, Result};

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    speed: f32,
    stability: f32,
    similarity_boost: f32,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a TTS client for the configured provider
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn from_config(client: reqwest::Client, config: &TtsConfig) -> Result<Self> {
        let api_key = match config.provider {
            TtsProvider::OpenAI => require_key(config.api_key.as_ref(), "OpenAI")?,
            TtsProvider::ElevenLabs => require_key(config.api_key.as_ref(), "ElevenLabs")?,
        };

        tracing::debug!(
            provider = %config.provider,
            voice = %config.voice,
            model = %config.model,
            "tts initialized"
        );

        Ok(Self {
            client,
            api_key,
            voice: config.voice.clone(),
            speed: config.speed,
            stability: config.stability,
            similarity_boost: config.similarity_boost,
            model: config.model.clone(),
            provider: config.provider,
        })
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str) -> std::result::Result<Vec<u8>, ServiceFailure> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceFailure::from_reqwest(&e))?;

        let audio = check_status(response, "openai-tts")
            .await?
            .bytes()
            .await
            .map_err(|e| ServiceFailure::from_reqwest(&e))?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> std::result::Result<Vec<u8>, ServiceFailure> {
        #[derive(serde::Serialize)]
        struct VoiceSettings {
            stability: f32,
            similarity_boost: f32,
        }

        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            voice_settings: VoiceSettings,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", self.voice);

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: self.stability,
                similarity_boost: self.similarity_boost,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceFailure::from_reqwest(&e))?;

        let audio = check_status(response, "elevenlabs")
            .await?
            .bytes()
            .await
            .map_err(|e| ServiceFailure::from_reqwest(&e))?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<PlaybackRequest> {
        tracing::debug!(provider = %self.provider, chars = text.len(), "synthesizing");

        let audio = match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
        .map_err(Error::Synthesis)?;

        if audio.is_empty() {
            return Err(Error::Synthesis(ServiceFailure::EmptyResult));
        }

        tracing::debug!(bytes = audio.len(), "synthesis complete");
        Ok(PlaybackRequest::mp3(PlaybackKind::Reply, audio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_rejected() {
        let config = TtsConfig {
            provider: TtsProvider::ElevenLabs,
            voice: TtsProvider::ElevenLabs.default_voice().to_string(),
            model: TtsProvider::ElevenLabs.default_model().to_string(),
            speed: 1.0,
            stability: 0.6,
            similarity_boost: 0.8,
            api_key: None,
        };
        let err = TextToSpeech::from_config(reqwest::Client::new(), &config)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(msg) if msg.contains("ElevenLabs")));
    }
}
