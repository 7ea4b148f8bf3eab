//! Agent: prompt enrichment on top of the MCP client.
//!
//! Collects the tool results, resources, and prompt templates a request
//! references, folds them into the prompt with a summary of what the
//! connected servers offer, and asks the chat model. Also keeps lightweight
//! in-memory sessions and a combined self-check.

pub mod errors;
pub mod orchestrator;
pub mod prompt;
pub mod types;

// Re-exports for convenience
pub use errors::AgentError;
pub use orchestrator::AgentOrchestrator;
pub use types::{
    AgentDebugInfo, AgentRequest, AgentResponse, AgentSession, McpCapabilities, McpResults,
    McpToolResult, SmartQueryOptions,
};
