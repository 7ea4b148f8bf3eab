//! In-process MCP server double used by the client tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::errors::McpError;
use super::transport::{Transport, TransportFactory};
use super::types::{error_codes, methods, JsonRpcRequest, ServerConfig};

/// How the mock answers one method.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Never answer.
    Hang,
    /// Answer with an id that matches no request.
    WrongId,
    /// Fail at the transport layer with this HTTP status.
    HttpError(u16),
    /// Answer with this JSON-RPC error.
    RpcError { code: i64, message: String },
    /// Answer with this `result`.
    Result(Value),
}

/// Scriptable server that answers the MCP methods the client uses.
pub struct MockServer {
    name: String,
    tools: Mutex<Value>,
    resources: Mutex<Value>,
    prompts: Mutex<Value>,
    overrides: Mutex<HashMap<String, MockBehavior>>,
    failing_connects: AtomicU32,
    calls: Mutex<Vec<(String, Option<Value>)>>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Self::named("mock")
    }

    pub fn named(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            tools: Mutex::new(json!([])),
            resources: Mutex::new(json!([])),
            prompts: Mutex::new(json!([])),
            overrides: Mutex::new(HashMap::new()),
            failing_connects: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_tools(&self, tools: Value) {
        *self.tools.lock().unwrap() = tools;
    }

    pub fn set_resources(&self, resources: Value) {
        *self.resources.lock().unwrap() = resources;
    }

    pub fn set_prompts(&self, prompts: Value) {
        *self.prompts.lock().unwrap() = prompts;
    }

    pub fn set_behavior(&self, method: &str, behavior: MockBehavior) {
        self.overrides
            .lock()
            .unwrap()
            .insert(method.to_string(), behavior);
    }

    /// The next `n` `initialize` calls fail with a transport error.
    pub fn fail_next_connects(&self, n: u32) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Params of the most recent call to `method`.
    pub fn last_params(&self, method: &str) -> Option<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .and_then(|(_, p)| p.clone())
    }

    fn default_result(&self, request: &JsonRpcRequest) -> Result<Value, (i64, String)> {
        let params = request.params.clone().unwrap_or(Value::Null);
        match request.method.as_str() {
            methods::INITIALIZE => Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
                "serverInfo": {"name": self.name, "version": "0.0.1"}
            })),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => Ok(json!({"tools": self.tools.lock().unwrap().clone()})),
            methods::RESOURCES_LIST => {
                Ok(json!({"resources": self.resources.lock().unwrap().clone()}))
            }
            methods::PROMPTS_LIST => Ok(json!({"prompts": self.prompts.lock().unwrap().clone()})),
            methods::TOOLS_CALL => Ok(json!({
                "content": [{"type": "text", "text": format!("called {}", params["name"].as_str().unwrap_or(""))}],
                "arguments": params["arguments"].clone()
            })),
            methods::RESOURCES_READ => Ok(json!({
                "contents": [{"uri": params["uri"].clone(), "text": "resource body"}]
            })),
            methods::PROMPTS_GET => Ok(json!({
                "messages": [{"role": "user", "content": {"type": "text", "text": format!("prompt {}", params["name"].as_str().unwrap_or(""))}}]
            })),
            other => Err((error_codes::METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        }
    }
}

#[async_trait]
impl Transport for MockServer {
    async fn send(&self, request: &JsonRpcRequest) -> Result<Value, McpError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.method.clone(), request.params.clone()));

        if request.method == methods::INITIALIZE {
            let remaining = self.failing_connects.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_connects.store(remaining - 1, Ordering::SeqCst);
                return Err(McpError::TransportError {
                    server: self.name.clone(),
                    reason: "connection refused".into(),
                });
            }
        }

        let behavior = self.overrides.lock().unwrap().get(&request.method).cloned();
        let outcome = match behavior {
            Some(MockBehavior::Hang) => std::future::pending().await,
            Some(MockBehavior::WrongId) => {
                return Ok(json!({"jsonrpc": "2.0", "id": "not-a-pending-id", "result": {}}));
            }
            Some(MockBehavior::HttpError(status)) => {
                return Err(McpError::HttpStatus {
                    server: self.name.clone(),
                    status,
                    body: "mock failure".into(),
                });
            }
            Some(MockBehavior::RpcError { code, message }) => Err((code, message)),
            Some(MockBehavior::Result(value)) => Ok(value),
            None => self.default_result(request),
        };

        Ok(match outcome {
            Ok(result) => json!({"jsonrpc": "2.0", "id": request.id, "result": result}),
            Err((code, message)) => {
                json!({"jsonrpc": "2.0", "id": request.id, "error": {"code": code, "message": message}})
            }
        })
    }
}

/// Hands out pre-registered mock servers by server name.
#[derive(Default)]
pub struct MockTransportFactory {
    servers: Mutex<HashMap<String, Arc<MockServer>>>,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register (or fetch) the mock behind `name`.
    pub fn server(&self, name: &str) -> Arc<MockServer> {
        self.servers
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| MockServer::named(name))
            .clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, config: &ServerConfig) -> Result<Arc<dyn Transport>, McpError> {
        Ok(self.server(&config.name))
    }
}
