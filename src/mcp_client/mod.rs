//! MCP Client: JSON-RPC over HTTP to a set of Model Context Protocol servers.
//!
//! This module handles:
//! - Per-server connections with bounded connect retries and request timeouts
//! - Request/response correlation through a pending-request table
//! - Capability discovery (tools, resources, prompts) and a unified registry
//! - Re-discovery on `*/list_changed` notifications
//! - Lifecycle and notification events for listeners
//!
//! The agent orchestrator and the command-line front end consume it through
//! [`McpClient`].

pub mod client;
pub mod connection;
pub mod diagnostics;
pub mod errors;
pub mod events;
pub mod registry;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use client::McpClient;
pub use connection::Connection;
pub use diagnostics::{DebugInfo, Finding, FindingLevel, SelfCheckReport, ServerDebugInfo};
pub use errors::{ErrorKind, McpError};
pub use events::{ClientEvent, ConnectionEvent, ServerEvent};
pub use registry::{CapabilityKind, CapabilityRegistry};
pub use transport::{HttpTransport, HttpTransportFactory, Transport, TransportFactory};
pub use types::{
    AuthConfig, PromptArgument, PromptDescriptor, Protocol, ResourceDescriptor, ServerConfig,
    ServerInfo, ServerStatus, ToolDescriptor,
};
