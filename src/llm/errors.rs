//! LLM client error types.

use thiserror::Error;

/// Errors from the chat model endpoint.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("AI API request failed: HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response carried no choices.
    #[error("no response from AI model")]
    EmptyResponse,

    /// The response body did not match the chat completion shape.
    #[error("invalid AI response: {reason}")]
    InvalidResponse { reason: String },

    /// Bad endpoint or client setup.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl LlmError {
    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            LlmError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}
