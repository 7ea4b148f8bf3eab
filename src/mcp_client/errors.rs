//! MCP Client error types.

use thiserror::Error;

/// Coarse classification of an [`McpError`], used by callers that decide
/// whether to retry, surface, or skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Disabled feature or missing/invalid server config.
    Config,
    /// Handshake/probe failure at connect time.
    Connection,
    /// JSON-RPC error reply or malformed message.
    Protocol,
    /// No reply within the configured window.
    Timeout,
    /// Unknown tool or server.
    NotFound,
    /// Non-2xx HTTP status or socket failure at request time.
    Transport,
}

/// Errors that can occur during MCP client operations.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// Configuration error (bad server entry, duplicate name, invalid URL).
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// No server registered under this name.
    #[error("server not found: '{name}'")]
    UnknownServer { name: String },

    /// Tool not found in the unified registry.
    #[error("tool not found: '{name}'")]
    UnknownTool { name: String },

    /// The owning server's connection is down.
    #[error("server not connected: '{server}'")]
    NotConnected { server: String },

    /// The configured protocol has no transport in this build.
    #[error("protocol '{protocol}' is not supported for server '{server}'; use http")]
    UnsupportedProtocol { server: String, protocol: String },

    /// Every connection attempt failed.
    #[error("failed to connect to server '{server}' after {attempts} attempt(s): {reason}")]
    ConnectFailed {
        server: String,
        attempts: u32,
        reason: String,
    },

    /// Socket-level failure (refused, reset, DNS).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Non-2xx HTTP response.
    #[error("HTTP {status} from server '{server}': {body}")]
    HttpStatus {
        server: String,
        status: u16,
        body: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("MCP error [{code}]: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Message could not be classified or a payload did not match its schema.
    #[error("protocol error from server '{server}': {reason}")]
    ProtocolError { server: String, reason: String },

    /// A request got no matching response in time.
    #[error("request '{method}' to server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The connection was closed while the request was outstanding.
    #[error("connection closed: '{server}'")]
    ConnectionClosed { server: String },
}

impl McpError {
    /// Map this error onto the taxonomy callers reason about.
    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::ConfigError { .. } | McpError::UnsupportedProtocol { .. } => ErrorKind::Config,
            McpError::UnknownServer { .. } | McpError::UnknownTool { .. } => ErrorKind::NotFound,
            McpError::NotConnected { .. }
            | McpError::ConnectFailed { .. }
            | McpError::ConnectionClosed { .. } => ErrorKind::Connection,
            McpError::TransportError { .. } | McpError::HttpStatus { .. } => ErrorKind::Transport,
            McpError::ServerError { .. } | McpError::ProtocolError { .. } => ErrorKind::Protocol,
            McpError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Whether this is an unknown-tool or unknown-server error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Whether the remote side answered at all (a JSON-RPC error still counts).
    pub fn is_remote_reply(&self) -> bool {
        matches!(self, McpError::ServerError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_not_found() {
        let err = McpError::UnknownTool {
            name: "calc:missing".into(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "tool not found: 'calc:missing'");
    }

    #[test]
    fn test_kind_transport_and_protocol() {
        let http = McpError::HttpStatus {
            server: "calc".into(),
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(http.kind(), ErrorKind::Transport);

        let rpc = McpError::ServerError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(rpc.kind(), ErrorKind::Protocol);
        assert!(rpc.is_remote_reply());
        assert_eq!(rpc.to_string(), "MCP error [-32601]: Method not found");
    }

    #[test]
    fn test_unsupported_protocol_is_config() {
        let err = McpError::UnsupportedProtocol {
            server: "ws-server".into(),
            protocol: "ws".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!err.is_not_found());
    }
}
