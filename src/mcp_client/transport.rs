//! JSON-RPC transports.
//!
//! A transport moves one request to the server and hands back the raw
//! inbound message. Correlation by id happens one level up, in
//! [`Connection`](super::Connection), so push-capable transports can share the
//! same pending-request table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client as HttpClient, Url};
use serde_json::Value;

use super::errors::McpError;
use super::types::{AuthConfig, JsonRpcRequest, Protocol, ServerConfig};

/// TCP connection timeout. The per-request deadline is enforced by the connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Header used for `api-key` auth.
const API_KEY_HEADER: &str = "X-API-Key";

// ─── Transport ───────────────────────────────────────────────────────────────

/// Moves JSON-RPC messages between the client and one server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `request` and return the message the server sent back.
    async fn send(&self, request: &JsonRpcRequest) -> Result<Value, McpError>;

    /// Release transport resources. Must be safe to call more than once.
    async fn close(&self) -> Result<(), McpError> {
        Ok(())
    }
}

/// Builds one transport per configured server.
pub trait TransportFactory: Send + Sync {
    fn create(&self, config: &ServerConfig) -> Result<Arc<dyn Transport>, McpError>;
}

/// Factory for the production HTTP transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn create(&self, config: &ServerConfig) -> Result<Arc<dyn Transport>, McpError> {
        match config.protocol {
            Protocol::Http => Ok(Arc::new(HttpTransport::from_config(config)?)),
            // No transport exists; the connection refuses to connect before using it.
            Protocol::Ws | Protocol::Stdio => Ok(Arc::new(UnsupportedTransport {
                server: config.name.clone(),
                protocol: config.protocol,
            })),
        }
    }
}

// ─── HTTP ────────────────────────────────────────────────────────────────────

/// Request/response over HTTP POST: the response body *is* the JSON-RPC reply.
pub struct HttpTransport {
    server_name: String,
    url: Url,
    http: HttpClient,
    headers: HeaderMap,
    auth: Option<AuthConfig>,
}

impl HttpTransport {
    /// Create a transport from a server config. Does not touch the network.
    pub fn from_config(config: &ServerConfig) -> Result<Self, McpError> {
        let url = Url::parse(&config.url).map_err(|e| McpError::ConfigError {
            reason: format!("invalid url '{}' for server '{}': {e}", config.url, config.name),
        })?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| McpError::TransportError {
                server: config.name.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            server_name: config.name.clone(),
            url,
            http,
            headers: build_headers(config)?,
            auth: config.auth.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &JsonRpcRequest) -> Result<Value, McpError> {
        let mut builder = self
            .http
            .post(self.url.clone())
            .headers(self.headers.clone())
            .json(request);

        builder = match &self.auth {
            Some(AuthConfig::Bearer { token }) => builder.bearer_auth(token),
            Some(AuthConfig::Basic { username, password }) => {
                builder.basic_auth(username, password.as_deref())
            }
            Some(AuthConfig::ApiKey { api_key }) => builder.header(API_KEY_HEADER, api_key),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::HttpStatus {
                server: self.server_name.clone(),
                status: status.as_u16(),
                body,
            });
        }

        response.json::<Value>().await.map_err(|e| McpError::ProtocolError {
            server: self.server_name.clone(),
            reason: format!("response body is not JSON: {e}"),
        })
    }
}

/// Merge `Content-Type` with the configured custom headers.
fn build_headers(config: &ServerConfig) -> Result<HeaderMap, McpError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (key, value) in &config.headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| McpError::ConfigError {
            reason: format!("invalid header name '{key}' for server '{}': {e}", config.name),
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| McpError::ConfigError {
            reason: format!("invalid value for header '{key}' on server '{}': {e}", config.name),
        })?;
        headers.insert(name, value);
    }

    Ok(headers)
}

// ─── Unsupported ─────────────────────────────────────────────────────────────

/// Placeholder for `ws` / `stdio` servers.
struct UnsupportedTransport {
    server: String,
    protocol: Protocol,
}

#[async_trait]
impl Transport for UnsupportedTransport {
    async fn send(&self, _request: &JsonRpcRequest) -> Result<Value, McpError> {
        Err(McpError::UnsupportedProtocol {
            server: self.server.clone(),
            protocol: self.protocol.to_string(),
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
