//! LLM client: non-streaming chat completions against an OpenAI-compatible
//! endpoint (LM Studio by default).
//!
//! The agent depends on the [`ChatModel`] trait only, so the endpoint is
//! interchangeable and tests can script replies.

pub mod client;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use client::{ChatModel, LmStudioClient};
pub use errors::LlmError;
pub use types::{ChatMessage, Completion, Role, Sampling, Usage};
