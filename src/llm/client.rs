//! OpenAI-compatible chat completion client for LM Studio and friends.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use crate::settings::ExtensionSettings;

use super::errors::LlmError;
use super::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Completion, Sampling};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout. Local models can take a while on long prompts.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ─── ChatModel ───────────────────────────────────────────────────────────────

/// A chat model that answers one conversation with one completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        sampling: Sampling,
    ) -> Result<Completion, LlmError>;

    /// Model identifier sent with each request.
    fn model_name(&self) -> &str;

    /// Base URL of the endpoint.
    fn endpoint(&self) -> &str;
}

// ─── LmStudioClient ──────────────────────────────────────────────────────────

/// Non-streaming client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct LmStudioClient {
    http: HttpClient,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LmStudioClient {
    pub fn new(
        base_url: &str,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Self, LlmError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::ConfigError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
            max_tokens,
        })
    }

    /// Build from the `apiUrl`, `model`, `temperature`, and `maxTokens` settings.
    pub fn from_settings(settings: &ExtensionSettings) -> Result<Self, LlmError> {
        Self::new(
            &settings.api_url,
            &settings.model,
            settings.temperature,
            settings.max_tokens,
        )
    }
}

#[async_trait]
impl ChatModel for LmStudioClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        sampling: Sampling,
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: sampling.temperature.unwrap_or(self.temperature),
            max_tokens: sampling.max_tokens.unwrap_or(self.max_tokens),
            stream: false,
        };

        tracing::debug!(
            url = %url,
            model = %body.model,
            messages = body.messages.len(),
            "sending chat completion"
        );

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionFailed {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(LlmError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                reason: e.to_string(),
            })?;

        let usage = parsed.usage;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            usage,
            finish_reason: choice.finish_reason,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
