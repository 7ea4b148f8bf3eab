//! Shared types for the agent.
//!
//! Requests and responses, the per-item MCP results gathered for a request,
//! and session snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{Role, Sampling, Usage};
use crate::mcp_client::{DebugInfo, PromptDescriptor, ResourceDescriptor, ToolDescriptor};

/// Default number of items `smart_query` picks per capability kind.
pub const DEFAULT_MAX_ITEMS: usize = 3;

/// Generate a request or session id: `{prefix}_{unix millis}_{random}`.
pub fn generate_id(prefix: &str) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}_{}", Utc::now().timestamp_millis(), &random[..9])
}

// ─── Requests ───────────────────────────────────────────────────────────────

/// One enriched-prompt request.
///
/// Tool entries are qualified names (`server:tool`). Resource entries are
/// `server:uri` and prompt entries `server:prompt`; only the first `:`
/// separates the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub id: String,
    pub prompt: String,
    /// Arguments passed to every tool call and prompt render.
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub mcp_tools: Vec<String>,
    #[serde(default)]
    pub mcp_resources: Vec<String>,
    #[serde(default)]
    pub mcp_prompts: Vec<String>,
    #[serde(default)]
    pub options: Sampling,
    /// When set, the exchange is appended to this session's history.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: generate_id("request"),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// True if the request names any MCP item to collect.
    pub fn wants_mcp_data(&self) -> bool {
        !(self.mcp_tools.is_empty() && self.mcp_resources.is_empty() && self.mcp_prompts.is_empty())
    }
}

/// Options for `smart_query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartQueryOptions {
    /// Pick relevant tools, resources and prompts by keyword overlap.
    #[serde(default)]
    pub auto_select: bool,
    /// Upper bound per capability kind.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default)]
    pub context: Option<Value>,
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

impl Default for SmartQueryOptions {
    fn default() -> Self {
        Self {
            auto_select: false,
            max_items: DEFAULT_MAX_ITEMS,
            context: None,
        }
    }
}

// ─── Results ────────────────────────────────────────────────────────────────

/// Outcome of one tool call made while collecting MCP data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// Everything collected for one request, keyed by the reference the caller
/// used. Resource and prompt failures are stored inline as `{"error": msg}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct McpResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<BTreeMap<String, McpToolResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<BTreeMap<String, Value>>,
}

impl McpResults {
    pub fn is_empty(&self) -> bool {
        self.tools.is_none() && self.resources.is_none() && self.prompts.is_none()
    }
}

/// Answer to an [`AgentRequest`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub id: String,
    pub content: String,
    pub mcp_results: McpResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

// ─── Sessions ───────────────────────────────────────────────────────────────

/// A message in a session's history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// MCP data collected for this user turn, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_data: Option<McpResults>,
}

/// Capability names visible when the session was created.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySnapshot {
    pub available_tools: Vec<String>,
    pub available_resources: Vec<String>,
    pub available_prompts: Vec<String>,
}

/// Model settings captured when the session was created.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub model: String,
    pub api_url: String,
    pub system_prompt: String,
    pub mcp_enabled: bool,
}

/// Conversation state for one session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<SessionMessage>,
    pub mcp_capabilities: CapabilitySnapshot,
    pub settings: SessionSettings,
}

// ─── Introspection ──────────────────────────────────────────────────────────

/// Current capability surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpCapabilities {
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
    pub connected_servers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDebugInfo {
    pub initialized: bool,
    pub active_sessions: usize,
    pub mcp_capabilities: McpCapabilities,
    pub mcp_debug_info: DebugInfo,
}
