//! Reasoning backend over an OpenAI-compatible chat completions endpoint

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{Backend, check_status};
use crate::config::GatewayConfig;
use crate::error::ServiceFailure;
use crate::{Error, Result};

/// Default system prompt; replies are spoken, so they must be short
const VOICE_SYSTEM_PROMPT: &str = "You are a voice assistant. Responses are spoken aloud: \
answer in one to three short conversational sentences, without markdown or lists. \
If you don't know something, say so.";

/// Routes the request to a gateway agent
const AGENT_HEADER: &str = "x-openclaw-agent-id";

/// Chat completions client for the Beacon gateway (or any compatible server)
pub struct GatewayBackend {
    client: reqwest::Client,
    endpoint: String,
    token: Option<SecretString>,
    agent: String,
    model: String,
    system_prompt: String,
}

impl GatewayBackend {
    #[must_use]
    pub fn from_config(client: reqwest::Client, config: &GatewayConfig) -> Self {
        let endpoint = format!("{}/v1/chat/completions", config.url.trim_end_matches('/'));
        tracing::debug!(
            endpoint = %endpoint,
            agent = %config.agent,
            model = %config.model,
            "gateway backend initialized"
        );

        Self {
            client,
            endpoint,
            token: config
                .token
                .as_ref()
                .map(|t| SecretString::from(t.expose_secret().to_string())),
            agent: config.agent.clone(),
            model: config.model.clone(),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| VOICE_SYSTEM_PROMPT.to_string()),
        }
    }

    fn request<'a>(&'a self, text: &'a str, session: &'a str) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            user: session,
            messages: vec![
                Message {
                    role: "system",
                    content: &self.system_prompt,
                },
                Message {
                    role: "user",
                    content: text,
                },
            ],
        }
    }

    async fn send(&self, text: &str, session: &str) -> std::result::Result<String, ServiceFailure> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(AGENT_HEADER, &self.agent)
            .json(&self.request(text, session));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ServiceFailure::from_reqwest(&e))?;

        let result: ChatCompletionResponse = check_status(response, "gateway")
            .await?
            .json()
            .await
            .map_err(|e| ServiceFailure::Decode(e.to_string()))?;

        result.into_reply().ok_or(ServiceFailure::EmptyResult)
    }
}

#[async_trait]
impl Backend for GatewayBackend {
    async fn respond(&self, text: &str, session: &str) -> Result<String> {
        tracing::debug!(session, chars = text.len(), "sending message to gateway");
        let reply = self.send(text, session).await.map_err(Error::Backend)?;
        tracing::info!(reply = %reply, "gateway replied");
        Ok(reply)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    user: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletionResponse {
    /// First choice's content, if non-blank
    fn into_reply(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
    }
}
