//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 envelopes, server configuration, runtime server state, and the
//! capability descriptors kept in the unified registry.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::McpError;

// ─── Protocol Constants ──────────────────────────────────────────────────────

/// MCP protocol revision announced in the `initialize` handshake.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name announced in `clientInfo`.
pub const CLIENT_NAME: &str = "python-runner-chat";

/// MCP method names used by the client.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
}

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
}

/// Build `initialize` params declaring the given client capabilities.
pub fn initialize_params(capabilities: Value) -> Value {
    serde_json::json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": capabilities,
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: impl Into<String>, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 response message (success or error).
///
/// `result` is `Some(Value::Null)` when the key is present with a null value,
/// and `None` only when the key is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The response id as a string, if it is one. Our request ids are always strings.
    pub fn id_str(&self) -> Option<&str> {
        self.id.as_str()
    }

    /// Convert into the call outcome, surfacing a JSON-RPC `error` as `ServerError`.
    pub fn into_result(self, server: &str) -> Result<Value, McpError> {
        if let Some(err) = self.error {
            return Err(McpError::ServerError {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        self.result.ok_or_else(|| McpError::ProtocolError {
            server: server.to_string(),
            reason: "response missing both result and error".into(),
        })
    }
}

/// Server-pushed notification (no `id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
    /// Server-initiated request; this client does not serve any methods.
    Request { id: Value, method: String },
}

impl IncomingMessage {
    /// Classify a raw message. A message is a notification iff it carries
    /// `method` and no `id`.
    pub fn classify(message: Value, server: &str) -> Result<Self, McpError> {
        let protocol_error = |reason: String| McpError::ProtocolError {
            server: server.to_string(),
            reason,
        };

        let Value::Object(mut obj) = message else {
            return Err(protocol_error("message is not a JSON object".into()));
        };

        let method = match obj.remove("method") {
            Some(Value::String(m)) => Some(m),
            Some(other) => return Err(protocol_error(format!("non-string method: {other}"))),
            None => None,
        };
        let id = obj.remove("id");

        match (id, method) {
            (None, Some(method)) => Ok(IncomingMessage::Notification(JsonRpcNotification {
                method,
                params: obj.remove("params"),
            })),
            (Some(id), Some(method)) => Ok(IncomingMessage::Request { id, method }),
            (Some(id), None) => {
                let error = match obj.remove("error") {
                    Some(raw) if !raw.is_null() => Some(
                        serde_json::from_value::<JsonRpcError>(raw)
                            .map_err(|e| protocol_error(format!("malformed error object: {e}")))?,
                    ),
                    _ => None,
                };
                let result = obj.remove("result");
                if result.is_none() && error.is_none() {
                    return Err(protocol_error("response missing both result and error".into()));
                }
                Ok(IncomingMessage::Response(JsonRpcResponse { id, result, error }))
            }
            (None, None) => Err(protocol_error("message has neither id nor method".into())),
        }
    }
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// Transport protocol for a server. Only `http` has a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Ws,
    Stdio,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Http => "http",
            Protocol::Ws => "ws",
            Protocol::Stdio => "stdio",
        };
        f.write_str(s)
    }
}

/// Authentication descriptor applied to every request to a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthConfig {
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
    ApiKey {
        #[serde(rename = "apiKey")]
        api_key: String,
    },
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_count() -> u32 {
    3
}

/// Server configuration from the `mcpServers` setting.
///
/// Compared by `name` only: two entries with the same name are the same server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    /// Retries after the first failed connection attempt.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

impl ServerConfig {
    /// Minimal enabled http config with default timeout and retries.
    pub fn http(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            protocol: Protocol::Http,
            enabled: true,
            timeout: default_timeout_ms(),
            retry_count: default_retry_count(),
            headers: HashMap::new(),
            auth: None,
        }
    }

    /// Reject entries the registry cannot hold.
    pub fn validate(&self) -> Result<(), McpError> {
        if self.name.trim().is_empty() {
            return Err(McpError::ConfigError {
                reason: "server name must not be empty".into(),
            });
        }
        if self.name.contains(':') {
            return Err(McpError::ConfigError {
                reason: format!("server name '{}' must not contain ':'", self.name),
            });
        }
        if self.protocol == Protocol::Http {
            reqwest::Url::parse(&self.url).map_err(|e| McpError::ConfigError {
                reason: format!("invalid url '{}' for server '{}': {e}", self.url, self.name),
            })?;
        }
        if self.timeout == 0 {
            return Err(McpError::ConfigError {
                reason: format!("timeout for server '{}' must be positive", self.name),
            });
        }
        Ok(())
    }
}

impl PartialEq for ServerConfig {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ServerConfig {}

// ─── Runtime State ───────────────────────────────────────────────────────────

/// Connection status of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Disconnected,
    Connecting,
    Retrying,
    Connected,
    Error,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Disconnected => "disconnected",
            ServerStatus::Connecting => "connecting",
            ServerStatus::Retrying => "retrying",
            ServerStatus::Connected => "connected",
            ServerStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of one configured server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub config: ServerConfig,
    pub status: ServerStatus,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
}

// ─── Capability Descriptors ──────────────────────────────────────────────────

/// A remote tool, owned by `server_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub server_id: String,
}

impl ToolDescriptor {
    /// `"{server_id}:{name}"`.
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.server_id, &self.name)
    }
}

/// A remote resource, addressed by its globally unique `uri`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub server_id: String,
}

/// Declared argument of a prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A remote prompt template, owned by `server_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
    pub server_id: String,
}

impl PromptDescriptor {
    /// `"{server_id}:{name}"`.
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.server_id, &self.name)
    }
}

/// Build a qualified capability name.
pub fn qualified_name(server: &str, name: &str) -> String {
    format!("{server}:{name}")
}

/// Split `"server:rest"` at the first `:`. The rest may itself contain `:`.
pub fn split_qualified_name(qualified: &str) -> Option<(&str, &str)> {
    match qualified.split_once(':') {
        Some((server, rest)) if !server.is_empty() && !rest.is_empty() => Some((server, rest)),
        _ => None,
    }
}

// ─── List Payloads ───────────────────────────────────────────────────────────

/// Tool entry in a `tools/list` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub output_schema: Option<Value>,
}

/// `tools/list` result payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ListedTool>,
}

/// Resource entry in a `resources/list` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedResource {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// `resources/list` result payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesListResult {
    #[serde(default)]
    pub resources: Vec<ListedResource>,
}

/// Prompt entry in a `prompts/list` result.
#[derive(Debug, Clone, Deserialize)]
pub struct ListedPrompt {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// `prompts/list` result payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptsListResult {
    #[serde(default)]
    pub prompts: Vec<ListedPrompt>,
}

impl ToolsListResult {
    pub fn into_descriptors(self, server: &str) -> Vec<ToolDescriptor> {
        self.tools
            .into_iter()
            .map(|t| ToolDescriptor {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
                output_schema: t.output_schema,
                server_id: server.to_string(),
            })
            .collect()
    }
}

impl ResourcesListResult {
    pub fn into_descriptors(self, server: &str) -> Vec<ResourceDescriptor> {
        self.resources
            .into_iter()
            .map(|r| ResourceDescriptor {
                name: r.name.unwrap_or_else(|| r.uri.clone()),
                uri: r.uri,
                description: r.description,
                mime_type: r.mime_type,
                server_id: server.to_string(),
            })
            .collect()
    }
}

impl PromptsListResult {
    pub fn into_descriptors(self, server: &str) -> Vec<PromptDescriptor> {
        self.prompts
            .into_iter()
            .map(|p| PromptDescriptor {
                name: p.name,
                description: p.description,
                arguments: p.arguments,
                server_id: server.to_string(),
            })
            .collect()
    }
}

/// Parse a list payload, mapping a shape mismatch to `ProtocolError`.
pub fn parse_payload<T: serde::de::DeserializeOwned>(
    value: Value,
    server: &str,
    method: &str,
) -> Result<T, McpError> {
    serde_json::from_value(value).map_err(|e| McpError::ProtocolError {
        server: server.to_string(),
        reason: format!("unexpected '{method}' payload: {e}"),
    })
}

/// Implementation info returned by the server's `initialize` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteImplementation {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: Option<RemoteImplementation>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
