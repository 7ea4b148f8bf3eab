//! Per-server connection: connect with bounded retries, request/response
//! correlation, and notification delivery.
//!
//! Every outbound request gets a fresh UUID and an entry in the pending table.
//! Inbound messages are routed through [`Connection::handle_message`]: a
//! response settles the pending entry with the same id (unmatched ids are
//! discarded), a notification is published as a [`ConnectionEvent`]. Over
//! HTTP the table only ever holds the calls currently in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::sleep;
use uuid::Uuid;

use super::errors::McpError;
use super::events::{ConnectionEvent, ServerEvent};
use super::transport::Transport;
use super::types::{initialize_params, methods, IncomingMessage, JsonRpcRequest, Protocol, ServerConfig};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Fixed delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

// ─── Pending Requests ────────────────────────────────────────────────────────

type Reply = Result<Value, McpError>;

/// An outstanding request awaiting its response.
struct PendingRequest {
    method: String,
    sent_at: Instant,
    reply: oneshot::Sender<Reply>,
}

// ─── Connection ──────────────────────────────────────────────────────────────

/// One server's network lifecycle and request correlation.
pub struct Connection {
    config: ServerConfig,
    transport: Arc<dyn Transport>,
    connected: AtomicBool,
    /// `request id → pending entry`.
    pending: Mutex<HashMap<String, PendingRequest>>,
    /// Held for the whole retry loop so at most one is running.
    connect_gate: Mutex<()>,
    /// Bumped by every `disconnect`; a retry loop started under an older
    /// value gives up.
    generation: AtomicU64,
    retry_delay: Duration,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl Connection {
    /// Create a disconnected connection. Nothing is sent until [`connect`](Self::connect).
    pub fn new(
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            config,
            transport,
            connected: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            connect_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
            retry_delay: DEFAULT_RETRY_DELAY,
            events,
        }
    }

    /// Override the delay between connection attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Whether the last connect succeeded and no disconnect followed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Name of the server this connection belongs to.
    pub fn server_name(&self) -> &str {
        &self.config.name
    }

    /// Number of requests currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout)
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receiver means the registry is gone; nothing left to notify.
        let _ = self.events.send(ServerEvent {
            server: self.config.name.clone(),
            event,
        });
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Connect, retrying up to `retry_count` times after the first failure.
    ///
    /// `ws` and `stdio` fail immediately without retrying. Concurrent callers
    /// share one retry loop: the second waits for the first and then returns
    /// early if it succeeded. A `disconnect` issued while the loop runs ends
    /// it with `ConnectionClosed` and the connection stays down.
    pub async fn connect(&self) -> Result<(), McpError> {
        let _gate = self.connect_gate.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        let generation = self.generation.load(Ordering::SeqCst);

        let name = self.config.name.as_str();

        if self.config.protocol != Protocol::Http {
            let err = McpError::UnsupportedProtocol {
                server: name.to_string(),
                protocol: self.config.protocol.to_string(),
            };
            tracing::error!(server = name, error = %err, "cannot connect to MCP server");
            self.emit(ConnectionEvent::Error {
                message: err.to_string(),
            });
            return Err(err);
        }

        tracing::info!(server = name, url = %self.config.url, "connecting to MCP server");

        let max_retries = self.config.retry_count;
        let mut attempt: u32 = 0;

        loop {
            if self.cancelled(generation) {
                return Err(self.closed_during_connect(attempt));
            }
            attempt += 1;
            match self.probe().await {
                Ok(()) => {
                    // Checked under the pending lock so a concurrent
                    // disconnect either lands before or sees us connected.
                    let pending = self.pending.lock().await;
                    if self.cancelled(generation) {
                        return Err(self.closed_during_connect(attempt));
                    }
                    self.connected.store(true, Ordering::SeqCst);
                    drop(pending);
                    self.emit(ConnectionEvent::Connected);
                    tracing::info!(server = name, attempt, "connected to MCP server");
                    return Ok(());
                }
                Err(e) => {
                    if self.cancelled(generation) {
                        return Err(self.closed_during_connect(attempt));
                    }
                    tracing::warn!(server = name, attempt, error = %e, "MCP connection attempt failed");

                    let retries_used = attempt - 1;
                    if retries_used >= max_retries {
                        let err = McpError::ConnectFailed {
                            server: name.to_string(),
                            attempts: attempt,
                            reason: e.to_string(),
                        };
                        self.emit(ConnectionEvent::Error {
                            message: err.to_string(),
                        });
                        return Err(err);
                    }

                    let retry = retries_used + 1;
                    tracing::info!(
                        server = name,
                        retry,
                        max_retries,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        "retrying MCP connection"
                    );
                    self.emit(ConnectionEvent::Retrying {
                        attempt: retry,
                        max_retries,
                    });
                    sleep(self.retry_delay).await;
                }
            }
        }
    }

    fn cancelled(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn closed_during_connect(&self, attempts: u32) -> McpError {
        tracing::info!(
            server = %self.config.name,
            attempts,
            "connect abandoned after explicit disconnect"
        );
        McpError::ConnectionClosed {
            server: self.config.name.clone(),
        }
    }

    /// Reachability probe: an `initialize` call. Any reply from the server,
    /// including a JSON-RPC error, proves the endpoint is up.
    async fn probe(&self) -> Result<(), McpError> {
        let params = initialize_params(serde_json::json!({}));
        match self.send_request(methods::INITIALIZE, Some(params)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_remote_reply() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Reject every pending request with `ConnectionClosed`, mark the
    /// connection down, and close the transport. Idempotent.
    ///
    /// Local state is always cleared; the returned error only reports a
    /// transport that failed to close. A `connect` retrying in the background
    /// stops at its next check.
    pub async fn disconnect(&self) -> Result<(), McpError> {
        let (drained, was_connected) = {
            let mut pending = self.pending.lock().await;
            self.generation.fetch_add(1, Ordering::SeqCst);
            let drained: Vec<(String, PendingRequest)> = pending.drain().collect();
            (drained, self.connected.swap(false, Ordering::SeqCst))
        };
        for (id, pending) in drained {
            tracing::debug!(
                server = %self.config.name,
                id = %id,
                method = %pending.method,
                "rejecting pending request on disconnect"
            );
            let _ = pending.reply.send(Err(McpError::ConnectionClosed {
                server: self.config.name.clone(),
            }));
        }

        if was_connected {
            self.emit(ConnectionEvent::Disconnected);
            tracing::info!(server = %self.config.name, "disconnected from MCP server");
        }

        self.transport.close().await
    }

    // ─── Requests ────────────────────────────────────────────────────────

    /// Send a request and wait for the response with the matching id.
    ///
    /// Fails with `Timeout` after the configured timeout; the pending entry is
    /// removed on every exit path.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if self.config.protocol != Protocol::Http {
            return Err(McpError::UnsupportedProtocol {
                server: self.config.name.clone(),
                protocol: self.config.protocol.to_string(),
            });
        }

        let request = JsonRpcRequest::new(Uuid::new_v4().to_string(), method, params);
        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();

        self.pending.lock().await.insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                sent_at: Instant::now(),
                reply: tx,
            },
        );

        tracing::debug!(
            server = %self.config.name,
            id = %id,
            method,
            params = ?request.params,
            "sending MCP request"
        );

        let outcome = tokio::time::timeout(self.request_timeout(), self.exchange(&request, rx)).await;

        if let Some(entry) = self.pending.lock().await.remove(&id) {
            tracing::debug!(
                server = %self.config.name,
                id = %id,
                elapsed_ms = entry.sent_at.elapsed().as_millis() as u64,
                "cleared pending request"
            );
        }

        match outcome {
            Ok(result) => {
                if let Err(e) = &result {
                    tracing::debug!(server = %self.config.name, method, error = %e, "MCP request failed");
                }
                result
            }
            Err(_) => {
                tracing::warn!(
                    server = %self.config.name,
                    method,
                    timeout_ms = self.config.timeout,
                    "MCP request timed out"
                );
                Err(McpError::Timeout {
                    server: self.config.name.clone(),
                    method: method.to_string(),
                    timeout_ms: self.config.timeout,
                })
            }
        }
    }

    /// Transmit and wait for the correlated reply.
    ///
    /// The reply may arrive through the transport's own return value or
    /// through [`handle_message`](Self::handle_message) from elsewhere; a
    /// disconnect settles it with `ConnectionClosed` either way.
    async fn exchange(&self, request: &JsonRpcRequest, mut reply: oneshot::Receiver<Reply>) -> Reply {
        let closed = || McpError::ConnectionClosed {
            server: self.config.name.clone(),
        };

        let delivery = self.transport.send(request);
        tokio::pin!(delivery);

        tokio::select! {
            sent = &mut delivery => {
                let message = sent?;
                self.handle_message(message).await?;
            }
            settled = &mut reply => {
                return settled.unwrap_or_else(|_| Err(closed()));
            }
        }

        // Delivered but unmatched: keep waiting for our id until timeout or disconnect.
        reply.await.unwrap_or_else(|_| Err(closed()))
    }

    /// Route one inbound message.
    ///
    /// Responses settle the pending request with the same id; unmatched ids
    /// are discarded. Notifications are published as events. Server-initiated
    /// requests are ignored. Malformed messages are a `ProtocolError`.
    pub async fn handle_message(&self, message: Value) -> Result<(), McpError> {
        let name = self.config.name.as_str();
        tracing::debug!(server = name, message = %message, "received MCP message");

        match IncomingMessage::classify(message, name)? {
            IncomingMessage::Response(response) => {
                let pending = match response.id_str() {
                    Some(id) => self.pending.lock().await.remove(id),
                    None => None,
                };
                match pending {
                    Some(entry) => {
                        let _ = entry.reply.send(response.into_result(name));
                    }
                    None => {
                        tracing::debug!(server = name, id = %response.id, "discarding unmatched response");
                    }
                }
            }
            IncomingMessage::Notification(notification) => {
                tracing::debug!(server = name, method = %notification.method, "received notification");
                self.emit(ConnectionEvent::Notification(notification));
            }
            IncomingMessage::Request { id, method } => {
                tracing::debug!(server = name, id = %id, method = %method, "ignoring server-initiated request");
            }
        }

        Ok(())
    }

    /// Lightweight liveness check used by the self-check.
    pub async fn ping(&self) -> Result<(), McpError> {
        match self.send_request(methods::PING, None).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_remote_reply() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::testing::{MockBehavior, MockServer};
    use serde_json::json;

    fn connection_with(
        server: &Arc<MockServer>,
        config: ServerConfig,
    ) -> (Connection, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(config, server.clone(), tx).with_retry_delay(Duration::from_millis(5));
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ConnectionEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev.event);
        }
        out
    }

    fn fast_config(name: &str) -> ServerConfig {
        let mut cfg = ServerConfig::http(name, "http://127.0.0.1:9/mcp");
        cfg.timeout = 100;
        cfg
    }

    #[tokio::test]
    async fn test_connect_success_emits_connected() {
        let server = MockServer::new();
        let (conn, mut rx) = connection_with(&server, fast_config("calc"));

        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(drain(&mut rx), vec![ConnectionEvent::Connected]);

        // Second connect is a no-op.
        conn.connect().await.unwrap();
        assert_eq!(server.call_count(methods::INITIALIZE), 1);
    }

    #[tokio::test]
    async fn test_connect_retries_then_succeeds() {
        let server = MockServer::new();
        server.fail_next_connects(2);
        let mut cfg = fast_config("calc");
        cfg.retry_count = 2;
        let (conn, mut rx) = connection_with(&server, cfg);

        conn.connect().await.unwrap();
        assert!(conn.is_connected());

        let events = drain(&mut rx);
        let retries: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::Retrying { .. }))
            .collect();
        assert_eq!(retries.len(), 2);
        assert_eq!(events.last(), Some(&ConnectionEvent::Connected));
        assert_eq!(server.call_count(methods::INITIALIZE), 3);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_retry_loop() {
        let server = MockServer::new();
        server.fail_next_connects(1);
        let mut cfg = fast_config("calc");
        cfg.retry_count = 3;
        let (conn, mut rx) = connection_with(&server, cfg);

        let (a, b) = tokio::join!(conn.connect(), conn.connect());
        a.unwrap();
        b.unwrap();

        // One failed attempt plus one success, not two probe sequences.
        assert_eq!(server.call_count(methods::INITIALIZE), 2);
        let connected = drain(&mut rx)
            .into_iter()
            .filter(|e| *e == ConnectionEvent::Connected)
            .count();
        assert_eq!(connected, 1);
    }

    #[tokio::test]
    async fn test_disconnect_during_retry_stops_connect() {
        let server = MockServer::new();
        server.fail_next_connects(1);
        let mut cfg = fast_config("calc");
        cfg.retry_count = 3;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Arc::new(
            Connection::new(cfg, server.clone(), tx).with_retry_delay(Duration::from_millis(300)),
        );

        let connecting = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        conn.disconnect().await.unwrap();

        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed { .. }));
        assert!(!conn.is_connected());
        assert_eq!(server.call_count(methods::INITIALIZE), 1);

        let events = drain(&mut rx);
        assert!(!events.contains(&ConnectionEvent::Connected));
        assert!(!events.iter().any(|e| matches!(e, ConnectionEvent::Error { .. })));

        // A later explicit connect still works.
        conn.connect().await.unwrap();
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_exhausts_retries() {
        let server = MockServer::new();
        server.fail_next_connects(10);
        let mut cfg = fast_config("calc");
        cfg.retry_count = 1;
        let (conn, mut rx) = connection_with(&server, cfg);

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, McpError::ConnectFailed { attempts: 2, .. }));
        assert!(!conn.is_connected());
        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(ConnectionEvent::Error { .. })));
        assert_eq!(server.call_count(methods::INITIALIZE), 2);
    }

    #[tokio::test]
    async fn test_connect_unsupported_protocol_is_permanent() {
        let server = MockServer::new();
        let mut cfg = fast_config("ws-server");
        cfg.protocol = Protocol::Ws;
        cfg.retry_count = 5;
        let (conn, mut rx) = connection_with(&server, cfg);

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, McpError::UnsupportedProtocol { .. }));
        assert_eq!(server.total_calls(), 0);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ConnectionEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_send_request_times_out_and_clears_pending() {
        let server = MockServer::new();
        server.set_behavior(methods::TOOLS_LIST, MockBehavior::Hang);
        let (conn, _rx) = connection_with(&server, fast_config("calc"));

        let started = Instant::now();
        let err = conn.send_request(methods::TOOLS_LIST, None).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, McpError::Timeout { timeout_ms: 100, .. }));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(1000));
        assert_eq!(conn.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unmatched_response_never_settles_request() {
        let server = MockServer::new();
        server.set_behavior(methods::TOOLS_LIST, MockBehavior::WrongId);
        let (conn, _rx) = connection_with(&server, fast_config("calc"));

        let err = conn.send_request(methods::TOOLS_LIST, None).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));
        assert_eq!(conn.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_json_rpc_error_surfaces_message() {
        let server = MockServer::new();
        let (conn, _rx) = connection_with(&server, fast_config("calc"));

        let err = conn.send_request("does/not/exist", None).await.unwrap_err();
        match err {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert!(message.contains("does/not/exist"));
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let server = MockServer::new();
        server.set_behavior(methods::TOOLS_LIST, MockBehavior::HttpError(500));
        let (conn, _rx) = connection_with(&server, fast_config("calc"));

        let err = conn.send_request(methods::TOOLS_LIST, None).await.unwrap_err();
        assert!(matches!(err, McpError::HttpStatus { status: 500, .. }));
        assert_eq!(conn.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_rejects_in_flight_requests() {
        let server = MockServer::new();
        server.set_behavior(methods::TOOLS_CALL, MockBehavior::Hang);
        let mut cfg = fast_config("calc");
        cfg.timeout = 5_000;
        let (conn, mut rx) = connection_with(&server, cfg);
        let conn = Arc::new(conn);
        conn.connect().await.unwrap();

        let in_flight = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.send_request(methods::TOOLS_CALL, None).await })
        };

        // Wait until the request is registered.
        while conn.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }

        conn.disconnect().await.unwrap();
        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed { .. }));
        assert!(!conn.is_connected());
        assert_eq!(conn.pending_count().await, 0);

        let events = drain(&mut rx);
        assert_eq!(events, vec![ConnectionEvent::Connected, ConnectionEvent::Disconnected]);

        // Idempotent: no second Disconnected event.
        conn.disconnect().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_resolve_independently() {
        let server = MockServer::new();
        let (conn, _rx) = connection_with(&server, fast_config("calc"));

        let (a, b) = tokio::join!(
            conn.send_request(methods::PING, None),
            conn.send_request(methods::TOOLS_LIST, None)
        );
        assert_eq!(a.unwrap(), json!({}));
        assert!(b.unwrap().get("tools").is_some());
        assert_eq!(conn.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_handle_message_routes_notification() {
        let server = MockServer::new();
        let (conn, mut rx) = connection_with(&server, fast_config("calc"));

        conn.handle_message(json!({"jsonrpc": "2.0", "method": methods::PROMPTS_LIST_CHANGED}))
            .await
            .unwrap();
        let events = drain(&mut rx);
        assert!(matches!(
            &events[..],
            [ConnectionEvent::Notification(n)] if n.method == methods::PROMPTS_LIST_CHANGED
        ));

        // Unmatched responses are dropped silently.
        conn.handle_message(json!({"id": "nobody", "result": 1})).await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }
}
