//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{SttProvider, Transcriber, check_status, require_key};
use crate::config::SttConfig;
use crate::error::ServiceFailure;
use crate::{Error, Result};

const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEEPGRAM_URL: &str = "https://api.deepgram.com/v1/listen";

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

impl DeepgramResponse {
    fn into_transcript(self) -> String {
        self.results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default()
    }
}

/// Transcribes speech to text through a hosted API
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create an STT client for the configured provider
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn from_config(client: reqwest::Client, config: &SttConfig) -> Result<Self> {
        let api_key = match config.provider {
            SttProvider::Local | SttProvider::Whisper => {
                require_key(config.api_key.as_ref(), "OpenAI")?
            }
            SttProvider::Deepgram => require_key(config.api_key.as_ref(), "Deepgram")?,
        };

        tracing::debug!(provider = %config.provider, model = %config.model, "stt initialized");

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            provider: config.provider,
        })
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: Vec<u8>) -> std::result::Result<String, ServiceFailure> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ServiceFailure::Decode(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(WHISPER_URL)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceFailure::from_reqwest(&e))?;

        let result: WhisperResponse = check_status(response, "whisper")
            .await?
            .json()
            .await
            .map_err(|e| ServiceFailure::Decode(e.to_string()))?;

        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: Vec<u8>) -> std::result::Result<String, ServiceFailure> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let response = self
            .client
            .post(DEEPGRAM_URL)
            .query(&[("model", self.model.as_str()), ("punctuate", "true")])
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|e| ServiceFailure::from_reqwest(&e))?;

        let result: DeepgramResponse = check_status(response, "deepgram")
            .await?
            .json()
            .await
            .map_err(|e| ServiceFailure::Decode(e.to_string()))?;

        Ok(result.into_transcript())
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        let transcript = match self.provider {
            SttProvider::Local | SttProvider::Whisper => self.transcribe_whisper(wav).await,
            SttProvider::Deepgram => self.transcribe_deepgram(wav).await,
        }
        .map_err(Error::Transcription)?;

        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            return Err(Error::Transcription(ServiceFailure::EmptyResult));
        }

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}
