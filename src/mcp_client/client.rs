//! MCP Client: the capability registry over all configured servers.
//!
//! Owns one [`Connection`] per server, drives connect/discover/disconnect, and
//! keeps the unified tool/resource/prompt maps in step with each server. This
//! is the API the agent and the command-line front end consume.
//!
//! Shared as `Arc<McpClient>`; every method takes `&self`. The state lock is
//! never held across a network call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::settings::SettingsProvider;

use super::connection::{Connection, DEFAULT_RETRY_DELAY};
use super::diagnostics::{DebugInfo, SelfCheckReport, ServerDebugInfo};
use super::errors::McpError;
use super::events::{ClientEvent, ConnectionEvent, ServerEvent};
use super::registry::{CapabilityKind, CapabilityRegistry};
use super::transport::{HttpTransportFactory, TransportFactory};
use super::types::{
    initialize_params, methods, parse_payload, InitializeResult, PromptDescriptor,
    PromptsListResult, ResourceDescriptor, ResourcesListResult, ServerConfig, ServerInfo,
    ServerStatus, ToolDescriptor, ToolsListResult,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Buffered client events per subscriber before the slowest one lags.
const EVENT_CAPACITY: usize = 256;

// ─── Internal State ──────────────────────────────────────────────────────────

/// Mutable runtime state of one server.
struct ServerState {
    config: ServerConfig,
    status: ServerStatus,
    last_connected: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct ManagedServer {
    state: ServerState,
    connection: Arc<Connection>,
}

#[derive(Default)]
struct ClientState {
    servers: HashMap<String, ManagedServer>,
    /// Registration order, for stable listings.
    order: Vec<String>,
    registry: CapabilityRegistry,
    initialized: bool,
}

/// A parsed `*/list` reply, ready to swap into the registry.
enum Listed {
    Tools(Vec<ToolDescriptor>),
    Resources(Vec<ResourceDescriptor>),
    Prompts(Vec<PromptDescriptor>),
}

impl Listed {
    fn parse(kind: CapabilityKind, reply: Value, server: &str) -> Result<Self, McpError> {
        let method = kind.list_method();
        Ok(match kind {
            CapabilityKind::Tools => Listed::Tools(
                parse_payload::<ToolsListResult>(reply, server, method)?.into_descriptors(server),
            ),
            CapabilityKind::Resources => Listed::Resources(
                parse_payload::<ResourcesListResult>(reply, server, method)?
                    .into_descriptors(server),
            ),
            CapabilityKind::Prompts => Listed::Prompts(
                parse_payload::<PromptsListResult>(reply, server, method)?.into_descriptors(server),
            ),
        })
    }

    /// Replace the server's entries of this kind. Returns the new count.
    fn apply(self, registry: &mut CapabilityRegistry, server: &str) -> usize {
        match self {
            Listed::Tools(tools) => {
                let count = tools.len();
                registry.replace_tools(server, tools);
                count
            }
            Listed::Resources(resources) => {
                let count = resources.len();
                registry.replace_resources(server, resources);
                count
            }
            Listed::Prompts(prompts) => {
                let count = prompts.len();
                registry.replace_prompts(server, prompts);
                count
            }
        }
    }
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Registry of MCP servers and their unified capabilities.
pub struct McpClient {
    settings: Arc<dyn SettingsProvider>,
    transports: Arc<dyn TransportFactory>,
    state: RwLock<ClientState>,
    /// Serializes `initialize` and `dispose`.
    init_gate: Mutex<()>,
    events: broadcast::Sender<ClientEvent>,
    conn_tx: mpsc::UnboundedSender<ServerEvent>,
    conn_rx: Mutex<Option<mpsc::UnboundedReceiver<ServerEvent>>>,
    retry_delay: Duration,
}

impl McpClient {
    /// Create a client that talks HTTP to its servers.
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self::with_transport_factory(settings, Arc::new(HttpTransportFactory))
    }

    /// Create a client with a custom transport factory.
    pub fn with_transport_factory(
        settings: Arc<dyn SettingsProvider>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            transports,
            state: RwLock::new(ClientState::default()),
            init_gate: Mutex::new(()),
            events,
            conn_tx,
            conn_rx: Mutex::new(Some(conn_rx)),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Delay between connection attempts for servers added from now on.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Subscribe to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        // Err only means nobody is listening.
        let _ = self.events.send(event);
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.initialized
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Register every enabled server from settings and, with auto-connect on,
    /// connect and discover them one by one in configuration order.
    ///
    /// No-op when already initialized. Returns the per-server failures; a
    /// failing server never stops the others.
    pub async fn initialize(&self) -> Vec<(String, McpError)> {
        let _gate = self.init_gate.lock().await;
        if self.state.read().await.initialized {
            tracing::debug!("MCP client already initialized");
            return Vec::new();
        }

        let settings = match self.settings.load() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!(error = %e, "failed to load MCP settings");
                return vec![(
                    "settings".to_string(),
                    McpError::ConfigError {
                        reason: e.to_string(),
                    },
                )];
            }
        };

        if !settings.mcp_enabled {
            tracing::info!("MCP disabled in settings, skipping initialization");
            return Vec::new();
        }

        let mut errors: Vec<(String, McpError)> = settings
            .rejected_servers
            .iter()
            .map(|rejected| {
                (
                    rejected.name.clone(),
                    McpError::ConfigError {
                        reason: format!("invalid server entry: {}", rejected.reason),
                    },
                )
            })
            .collect();
        let mut added = Vec::new();

        for config in settings.mcp_servers {
            if !config.enabled {
                tracing::debug!(server = %config.name, "skipping disabled MCP server");
                continue;
            }
            let name = config.name.clone();
            match self.add_server(config).await {
                Ok(()) => added.push(name),
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to register MCP server");
                    errors.push((name, e));
                }
            }
        }

        if settings.mcp_auto_connect {
            for name in &added {
                if let Err(e) = self.connect_to_server(name).await {
                    errors.push((name.clone(), e));
                }
            }
        }

        self.state.write().await.initialized = true;
        tracing::info!(
            servers = added.len(),
            failed = errors.len(),
            "MCP client initialized"
        );
        errors
    }

    /// Register a server at runtime. It starts out disconnected.
    pub async fn add_server(&self, config: ServerConfig) -> Result<(), McpError> {
        config.validate()?;
        let transport = self.transports.create(&config)?;
        let name = config.name.clone();

        {
            let mut state = self.state.write().await;
            if state.servers.contains_key(&name) {
                return Err(McpError::ConfigError {
                    reason: format!("duplicate server name '{name}'"),
                });
            }

            let connection = Connection::new(config.clone(), transport, self.conn_tx.clone())
                .with_retry_delay(self.retry_delay);
            state.order.push(name.clone());
            state.servers.insert(
                name.clone(),
                ManagedServer {
                    state: ServerState {
                        config,
                        status: ServerStatus::Disconnected,
                        last_connected: None,
                        last_error: None,
                    },
                    connection: Arc::new(connection),
                },
            );
        }

        tracing::info!(server = %name, "registered MCP server");
        self.emit(ClientEvent::ServerAdded { name });
        Ok(())
    }

    /// Connect a registered server and discover its capabilities.
    ///
    /// A discovery failure after a successful connect is logged, not returned.
    pub async fn connect_to_server(&self, name: &str) -> Result<(), McpError> {
        let connection = self.connection(name).await?;
        if connection.is_connected() {
            return Ok(());
        }

        self.update_server(name, |s, _| s.status = ServerStatus::Connecting)
            .await;

        match connection.connect().await {
            Ok(()) => {
                self.update_server(name, |s, _| {
                    s.status = ServerStatus::Connected;
                    s.last_connected = Some(Utc::now());
                    s.last_error = None;
                })
                .await;

                if let Err(e) = self.discover_capabilities(name).await {
                    tracing::warn!(server = name, error = %e, "capability discovery failed");
                }
                Ok(())
            }
            Err(e @ McpError::ConnectionClosed { .. }) => {
                // Disconnected or removed while retrying; that call owns the status.
                tracing::info!(server = name, "connect cancelled by disconnect");
                Err(e)
            }
            Err(e) => {
                tracing::error!(server = name, error = %e, "failed to connect to MCP server");
                let message = e.to_string();
                self.update_server(name, |s, registry| {
                    s.status = ServerStatus::Error;
                    s.last_error = Some(message);
                    registry.unregister_server(name);
                })
                .await;
                Err(e)
            }
        }
    }

    /// Disconnect a server and drop its capabilities.
    ///
    /// Local state is always cleaned up; an error only reports a transport
    /// that failed to close.
    pub async fn disconnect_from_server(&self, name: &str) -> Result<(), McpError> {
        let connection = self.connection(name).await?;
        let closed = connection.disconnect().await;

        self.update_server(name, |s, registry| {
            s.status = ServerStatus::Disconnected;
            registry.unregister_server(name);
        })
        .await;

        closed
    }

    /// Disconnect every server, logging failures.
    pub async fn disconnect_all_servers(&self) {
        for name in self.server_names().await {
            if let Err(e) = self.disconnect_from_server(&name).await {
                tracing::warn!(server = %name, error = %e, "error disconnecting MCP server");
            }
        }
    }

    /// Disconnect (best-effort) and forget a server.
    ///
    /// Unknown names fail with `UnknownServer`.
    pub async fn remove_server(&self, name: &str) -> Result<(), McpError> {
        let connection = self.connection(name).await?;

        if let Err(e) = connection.disconnect().await {
            tracing::warn!(server = name, error = %e, "disconnect failed while removing server");
        }

        {
            let mut state = self.state.write().await;
            state.servers.remove(name);
            state.order.retain(|n| n != name);
            state.registry.unregister_server(name);
        }

        tracing::info!(server = name, "removed MCP server");
        self.emit(ClientEvent::ServerRemoved {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Re-run discovery on every connected server.
    pub async fn refresh_all_servers(&self) -> Vec<(String, McpError)> {
        let mut errors = Vec::new();
        for name in self.get_connected_servers().await {
            if let Err(e) = self.discover_capabilities(&name).await {
                tracing::warn!(server = %name, error = %e, "failed to refresh MCP server");
                errors.push((name, e));
            }
        }
        errors
    }

    /// Disconnect everything, forget all servers, and allow `initialize` again.
    pub async fn dispose(&self) {
        let _gate = self.init_gate.lock().await;

        let connections: Vec<(String, Arc<Connection>)> = {
            let state = self.state.read().await;
            state
                .order
                .iter()
                .filter_map(|n| state.servers.get(n).map(|m| (n.clone(), m.connection.clone())))
                .collect()
        };

        for (name, connection) in connections {
            if let Err(e) = connection.disconnect().await {
                tracing::warn!(server = %name, error = %e, "error disconnecting during dispose");
            }
        }

        let mut state = self.state.write().await;
        state.servers.clear();
        state.order.clear();
        state.registry.clear();
        state.initialized = false;
        tracing::info!("MCP client disposed");
    }

    // ─── Discovery ───────────────────────────────────────────────────────

    /// Handshake, then refresh tools, resources, and prompts in that order.
    ///
    /// A failing list call is logged and does not stop the remaining ones.
    pub async fn discover_capabilities(&self, name: &str) -> Result<(), McpError> {
        let connection = self.connected_connection(name).await?;

        let params = initialize_params(json!({
            "tools": {},
            "resources": {},
            "prompts": {},
        }));
        let reply = connection
            .send_request(methods::INITIALIZE, Some(params))
            .await?;

        match parse_payload::<InitializeResult>(reply, name, methods::INITIALIZE) {
            Ok(init) => tracing::debug!(
                server = name,
                protocol_version = ?init.protocol_version,
                remote = ?init.server_info.and_then(|i| i.name),
                "MCP handshake complete"
            ),
            Err(e) => tracing::warn!(server = name, error = %e, "unexpected initialize reply"),
        }

        for kind in CapabilityKind::ALL {
            if let Err(e) = self.refresh_capability(name, kind).await {
                tracing::warn!(server = name, kind = ?kind, error = %e, "capability refresh failed");
            }
        }

        let state = self.state.read().await;
        tracing::info!(
            server = name,
            tools = state.registry.tools_for_server(name).len(),
            resources = state.registry.resources_for_server(name).len(),
            prompts = state.registry.prompts_for_server(name).len(),
            "discovered MCP capabilities"
        );
        Ok(())
    }

    /// Refresh one capability kind for one server. Returns the new count.
    ///
    /// The reply is discarded if the server was removed or disconnected while
    /// the list call was in flight.
    pub async fn refresh_capability(
        &self,
        name: &str,
        kind: CapabilityKind,
    ) -> Result<usize, McpError> {
        let connection = self.connected_connection(name).await?;
        let reply = connection.send_request(kind.list_method(), None).await?;
        let listed = Listed::parse(kind, reply, name)?;

        let mut state = self.state.write().await;
        let still_live = state
            .servers
            .get(name)
            .is_some_and(|m| Arc::ptr_eq(&m.connection, &connection) && connection.is_connected());
        if !still_live {
            tracing::debug!(server = name, kind = ?kind, "discarding refresh for departed server");
            return Ok(0);
        }

        let count = listed.apply(&mut state.registry, name);
        tracing::debug!(server = name, kind = ?kind, count, "refreshed capabilities");
        Ok(count)
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// Invoke a tool by qualified name (`"server:tool"`) and return the raw result.
    ///
    /// Unknown tools and disconnected servers fail before any request is sent.
    pub async fn call_tool(&self, qualified: &str, arguments: Value) -> Result<Value, McpError> {
        let (server, tool, connection) = {
            let state = self.state.read().await;
            let descriptor = state
                .registry
                .get_tool(qualified)
                .ok_or_else(|| McpError::UnknownTool {
                    name: qualified.to_string(),
                })?;
            let managed = state.servers.get(&descriptor.server_id).ok_or_else(|| {
                McpError::UnknownServer {
                    name: descriptor.server_id.clone(),
                }
            })?;
            (
                descriptor.server_id.clone(),
                descriptor.name.clone(),
                managed.connection.clone(),
            )
        };

        if !connection.is_connected() {
            return Err(McpError::NotConnected { server });
        }

        tracing::debug!(server = %server, tool = %tool, "calling MCP tool");
        connection
            .send_request(
                methods::TOOLS_CALL,
                Some(json!({ "name": tool, "arguments": arguments })),
            )
            .await
    }

    /// Read a resource from a specific server.
    pub async fn read_resource(&self, server: &str, uri: &str) -> Result<Value, McpError> {
        let connection = self.connected_connection(server).await?;
        tracing::debug!(server, uri, "reading MCP resource");
        connection
            .send_request(methods::RESOURCES_READ, Some(json!({ "uri": uri })))
            .await
    }

    /// Render a prompt template on a specific server.
    pub async fn get_prompt(
        &self,
        server: &str,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, McpError> {
        let connection = self.connected_connection(server).await?;
        tracing::debug!(server, prompt = name, "getting MCP prompt");
        connection
            .send_request(
                methods::PROMPTS_GET,
                Some(json!({
                    "name": name,
                    "arguments": arguments.unwrap_or_else(|| json!({})),
                })),
            )
            .await
    }

    /// Feed an inbound message to a server's connection, as a push-capable
    /// transport would.
    pub async fn handle_server_message(&self, server: &str, message: Value) -> Result<(), McpError> {
        self.connection(server).await?.handle_message(message).await
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub async fn get_available_tools(&self) -> Vec<ToolDescriptor> {
        self.state.read().await.registry.tools()
    }

    pub async fn get_available_resources(&self) -> Vec<ResourceDescriptor> {
        self.state.read().await.registry.resources()
    }

    pub async fn get_available_prompts(&self) -> Vec<PromptDescriptor> {
        self.state.read().await.registry.prompts()
    }

    /// Qualified tool names close to `name`, for "did you mean" hints.
    pub async fn suggest_tools(&self, name: &str) -> Vec<String> {
        self.state.read().await.registry.find_similar_tools(name, 3)
    }

    /// Names of servers whose connection is up, sorted.
    pub async fn get_connected_servers(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state
            .servers
            .iter()
            .filter(|(_, m)| m.connection.is_connected())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Snapshots of every registered server, in registration order.
    pub async fn get_servers(&self) -> Vec<ServerInfo> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|n| state.servers.get(n).map(|m| server_info(m, &state.registry)))
            .collect()
    }

    pub async fn get_server(&self, name: &str) -> Option<ServerInfo> {
        let state = self.state.read().await;
        state.servers.get(name).map(|m| server_info(m, &state.registry))
    }

    async fn server_names(&self) -> Vec<String> {
        self.state.read().await.order.clone()
    }

    async fn connection(&self, name: &str) -> Result<Arc<Connection>, McpError> {
        self.state
            .read()
            .await
            .servers
            .get(name)
            .map(|m| m.connection.clone())
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })
    }

    async fn connected_connection(&self, name: &str) -> Result<Arc<Connection>, McpError> {
        let connection = self.connection(name).await?;
        if !connection.is_connected() {
            return Err(McpError::NotConnected {
                server: name.to_string(),
            });
        }
        Ok(connection)
    }

    // ─── Diagnostics ─────────────────────────────────────────────────────

    /// Health checklist. Never fails; problems become failing findings.
    pub async fn run_self_check(&self) -> SelfCheckReport {
        let mut report = SelfCheckReport::new();

        if self.is_initialized().await {
            report.pass("MCP client initialized");
        } else {
            report.fail("MCP client not initialized");
        }

        match self.settings.load() {
            Ok(settings) if settings.mcp_enabled => report.pass("MCP functionality enabled"),
            Ok(_) => report.warn("MCP functionality disabled in settings"),
            Err(e) => report.fail(format!("settings could not be read: {e}")),
        }

        let connected = self.get_connected_servers().await;
        if connected.is_empty() {
            report.warn("No MCP servers connected");
        } else {
            report.pass(format!("{} MCP server(s) connected", connected.len()));
        }

        {
            let state = self.state.read().await;
            report.info(format!("Available tools: {}", state.registry.tool_count()));
            report.info(format!("Available resources: {}", state.registry.resource_count()));
            report.info(format!("Available prompts: {}", state.registry.prompt_count()));
        }

        for name in connected {
            let outcome = match self.connection(&name).await {
                Ok(connection) => connection.ping().await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => report.pass(format!("Server {name} responding")),
                Err(e) => report.fail(format!("Server {name} not responding: {e}")),
            }
        }

        report
    }

    /// Serializable snapshot for troubleshooting.
    pub async fn get_debug_info(&self) -> DebugInfo {
        let (initialized, entries, counts) = {
            let state = self.state.read().await;
            let entries: Vec<_> = state
                .order
                .iter()
                .filter_map(|n| state.servers.get(n))
                .map(|m| {
                    let name = m.state.config.name.as_str();
                    (
                        ServerDebugInfo {
                            name: name.to_string(),
                            url: m.state.config.url.clone(),
                            protocol: m.state.config.protocol,
                            status: m.state.status,
                            connected: m.connection.is_connected(),
                            pending_requests: 0,
                            last_connected: m.state.last_connected,
                            last_error: m.state.last_error.clone(),
                            tools: state.registry.tools_for_server(name).len(),
                            resources: state.registry.resources_for_server(name).len(),
                            prompts: state.registry.prompts_for_server(name).len(),
                        },
                        m.connection.clone(),
                    )
                })
                .collect();
            let counts = (
                state.registry.tool_count(),
                state.registry.resource_count(),
                state.registry.prompt_count(),
            );
            (state.initialized, entries, counts)
        };

        let mut servers = Vec::with_capacity(entries.len());
        let mut connected_servers = Vec::new();
        for (mut info, connection) in entries {
            info.pending_requests = connection.pending_count().await;
            if info.connected {
                connected_servers.push(info.name.clone());
            }
            servers.push(info);
        }
        connected_servers.sort();

        DebugInfo {
            initialized,
            servers,
            connected_servers,
            tool_count: counts.0,
            resource_count: counts.1,
            prompt_count: counts.2,
        }
    }

    // ─── Connection Events ───────────────────────────────────────────────

    /// Process every queued connection event now. Returns how many were handled.
    ///
    /// Does nothing once [`spawn_event_loop`](Self::spawn_event_loop) owns the queue.
    pub async fn pump_events(&self) -> usize {
        let drained: Vec<ServerEvent> = {
            let Ok(mut guard) = self.conn_rx.try_lock() else {
                return 0;
            };
            let Some(rx) = guard.as_mut() else {
                return 0;
            };
            let mut drained = Vec::new();
            while let Ok(event) = rx.try_recv() {
                drained.push(event);
            }
            drained
        };

        let count = drained.len();
        for event in drained {
            self.handle_server_event(event).await;
        }
        count
    }

    /// Hand the event queue to a background task. Returns `None` if the queue
    /// is already owned by a previous loop.
    ///
    /// The task holds only a weak reference and ends when the client is dropped.
    pub fn spawn_event_loop(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut rx = self.conn_rx.try_lock().ok()?.take()?;
        let client = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(client) = client.upgrade() else {
                    break;
                };
                client.handle_server_event(event).await;
            }
            tracing::debug!("MCP event loop stopped");
        }))
    }

    /// Translate one connection event into status changes, refreshes, and
    /// client events. Lifecycle events are checked against the connection's
    /// live state so a stale event never overrides a newer transition.
    async fn handle_server_event(&self, event: ServerEvent) {
        let ServerEvent { server, event } = event;
        let Ok(connection) = self.connection(&server).await else {
            tracing::debug!(server = %server, "dropping event for unknown server");
            return;
        };

        match event {
            ConnectionEvent::Connected => {
                if connection.is_connected() {
                    self.update_server(&server, |s, _| s.status = ServerStatus::Connected)
                        .await;
                }
            }
            ConnectionEvent::Disconnected => {
                if !connection.is_connected() {
                    self.update_server(&server, |s, registry| {
                        s.status = ServerStatus::Disconnected;
                        registry.unregister_server(&s.config.name);
                    })
                    .await;
                }
            }
            ConnectionEvent::Retrying {
                attempt,
                max_retries,
            } => {
                tracing::debug!(server = %server, attempt, max_retries, "server retrying");
                if !connection.is_connected() {
                    self.update_server(&server, |s, _| {
                        if matches!(s.status, ServerStatus::Connecting | ServerStatus::Retrying) {
                            s.status = ServerStatus::Retrying;
                        }
                    })
                    .await;
                }
            }
            ConnectionEvent::Error { message } => {
                if !connection.is_connected() {
                    self.update_server(&server, |s, registry| {
                        s.status = ServerStatus::Error;
                        s.last_error = Some(message);
                        registry.unregister_server(&s.config.name);
                    })
                    .await;
                }
            }
            ConnectionEvent::Notification(notification) => {
                self.emit(ClientEvent::Notification {
                    server_name: server.clone(),
                    method: notification.method.clone(),
                    params: notification.params.clone(),
                });

                if let Some(kind) = CapabilityKind::from_list_changed(&notification.method) {
                    tracing::info!(server = %server, kind = ?kind, "capability list changed");
                    if let Err(e) = self.refresh_capability(&server, kind).await {
                        tracing::warn!(server = %server, kind = ?kind, error = %e, "refresh after list change failed");
                    }
                }
            }
        }
    }

    /// Apply `update` to a server's state and publish `StatusChanged` if the
    /// status moved. Unknown servers are ignored.
    async fn update_server<F>(&self, name: &str, update: F)
    where
        F: FnOnce(&mut ServerState, &mut CapabilityRegistry),
    {
        let changed = {
            let mut guard = self.state.write().await;
            let ClientState {
                servers, registry, ..
            } = &mut *guard;
            let Some(managed) = servers.get_mut(name) else {
                return;
            };
            let before = managed.state.status;
            update(&mut managed.state, registry);
            (before != managed.state.status).then_some(managed.state.status)
        };

        if let Some(status) = changed {
            tracing::info!(server = name, %status, "server status changed");
            self.emit(ClientEvent::StatusChanged {
                name: name.to_string(),
                status,
            });
        }
    }
}

fn server_info(managed: &ManagedServer, registry: &CapabilityRegistry) -> ServerInfo {
    let name = managed.state.config.name.as_str();
    ServerInfo {
        config: managed.state.config.clone(),
        status: managed.state.status,
        last_connected: managed.state.last_connected,
        last_error: managed.state.last_error.clone(),
        tools: registry.tools_for_server(name),
        resources: registry.resources_for_server(name),
        prompts: registry.prompts_for_server(name),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
