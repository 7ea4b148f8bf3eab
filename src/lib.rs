//! Core of the Python Runner Chat extension: an MCP client that keeps a set of
//! Model Context Protocol servers connected, a unified view of their tools,
//! resources, and prompts, and an agent that enriches model prompts with
//! live MCP data.

pub mod agent;
pub mod llm;
pub mod logging;
pub mod mcp_client;
pub mod settings;

pub use agent::AgentOrchestrator;
pub use mcp_client::McpClient;
pub use settings::{ExtensionSettings, SettingsFile, SettingsProvider};
