//! Agent error types.

use thiserror::Error;

use crate::llm::LlmError;
use crate::mcp_client::McpError;
use crate::settings::SettingsError;

/// Errors that can occur while the agent serves a request.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// MCP failure that was not absorbed into a per-item result.
    #[error(transparent)]
    Mcp(#[from] McpError),

    /// Chat model failure.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Settings could not be read.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Session not found.
    #[error("session not found: '{session_id}'")]
    SessionNotFound { session_id: String },

    /// A resource or prompt reference is not of the form `server:name`.
    #[error("invalid {kind} reference '{reference}': expected 'server:{kind}'")]
    InvalidReference {
        kind: &'static str,
        reference: String,
    },
}
