//! Agent orchestrator: enriches prompts with live MCP data and asks the model.
//!
//! One request goes through three steps:
//!   1. Collect the referenced tool results, resources, and prompt renders
//!      concurrently. A failing item becomes an inline error and never fails
//!      the batch.
//!   2. Build the enriched prompt (collected data plus available capabilities).
//!   3. Run one chat completion and return a structured response.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use crate::llm::{ChatMessage, ChatModel, Role, Sampling};
use crate::mcp_client::types::split_qualified_name;
use crate::mcp_client::{McpClient, McpError, SelfCheckReport};
use crate::settings::SettingsProvider;

use super::errors::AgentError;
use super::prompt::{build_enriched_prompt, keywords, select_relevant};
use super::types::{
    generate_id, AgentDebugInfo, AgentRequest, AgentResponse, AgentSession, CapabilitySnapshot,
    McpCapabilities, McpResults, McpToolResult, SessionMessage, SessionSettings,
    SmartQueryOptions,
};

/// Prompt sent to the model during self-check.
const SELF_CHECK_PROMPT: &str = "Hello, this is a test message. Please respond briefly.";

pub struct AgentOrchestrator {
    client: Arc<McpClient>,
    model: Arc<dyn ChatModel>,
    settings: Arc<dyn SettingsProvider>,
    /// Each session is locked for the whole of a request that uses it, so
    /// requests on one session run one after another.
    sessions: RwLock<HashMap<String, Arc<Mutex<AgentSession>>>>,
    initialized: AtomicBool,
}

impl AgentOrchestrator {
    pub fn new(
        client: Arc<McpClient>,
        model: Arc<dyn ChatModel>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            client,
            model,
            settings,
            sessions: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn mcp_client(&self) -> &Arc<McpClient> {
        &self.client
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Initialize the MCP client. Idempotent. Returns per-server failures.
    pub async fn initialize(&self) -> Vec<(String, McpError)> {
        if self.is_initialized() {
            return Vec::new();
        }

        tracing::info!("initializing agent with MCP integration");
        let errors = self.client.initialize().await;
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(failed_servers = errors.len(), "agent initialized");
        errors
    }

    // ─── Sessions ───────────────────────────────────────────────────────

    /// Create a session, generating an id if none is given. An existing
    /// session with the same id is replaced.
    pub async fn create_session(&self, session_id: Option<&str>) -> Result<String, AgentError> {
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| generate_id("session"));
        let settings = self.settings.load()?;

        let mcp_capabilities = CapabilitySnapshot {
            available_tools: names(self.client.get_available_tools().await, |t| t.qualified_name()),
            available_resources: names(self.client.get_available_resources().await, |r| r.uri),
            available_prompts: names(self.client.get_available_prompts().await, |p| {
                p.qualified_name()
            }),
        };

        let session = AgentSession {
            session_id: session_id.clone(),
            created_at: Utc::now(),
            messages: Vec::new(),
            mcp_capabilities,
            settings: SessionSettings {
                model: settings.model,
                api_url: settings.api_url,
                system_prompt: settings.system_prompt,
                mcp_enabled: settings.mcp_enabled,
            },
        };

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::new(Mutex::new(session)));
        tracing::info!(session_id = %session_id, "created agent session");
        Ok(session_id)
    }

    /// Snapshot of a session. Waits for a request running on it to finish.
    pub async fn get_session(&self, session_id: &str) -> Option<AgentSession> {
        let session = self.sessions.read().await.get(session_id).cloned()?;
        let snapshot = session.lock().await.clone();
        Some(snapshot)
    }

    /// Returns whether a session was removed.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            tracing::info!(session_id, "deleted agent session");
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    // ─── Requests ───────────────────────────────────────────────────────

    /// Collect MCP data, enrich the prompt, and run one completion.
    ///
    /// Only the model call and settings loading can fail the request; MCP
    /// failures are reported per item in `mcp_results`.
    pub async fn process_request(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let start = Instant::now();
        tracing::info!(request_id = %request.id, "processing agent request");

        let mut session = match &request.session_id {
            Some(id) => {
                let session = self.sessions.read().await.get(id).cloned().ok_or_else(|| {
                    AgentError::SessionNotFound {
                        session_id: id.clone(),
                    }
                })?;
                Some(session.lock_owned().await)
            }
            None => None,
        };
        let history: Vec<ChatMessage> = session
            .as_ref()
            .map(|s| {
                s.messages
                    .iter()
                    .map(|m| ChatMessage {
                        role: m.role,
                        content: m.content.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let settings = self.settings.load()?;
        let mcp_results = self.collect_mcp_data(&request).await;

        let enriched = build_enriched_prompt(
            &request.prompt,
            &mcp_results,
            &self.client.get_available_tools().await,
            &self.client.get_available_resources().await,
            &self.client.get_available_prompts().await,
        );

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(settings.system_prompt));
        messages.extend(history);
        messages.push(ChatMessage::user(enriched));

        let completion = self
            .model
            .complete(messages, request.options)
            .await
            .map_err(|e| {
                tracing::error!(request_id = %request.id, error = %e, "AI model call failed");
                e
            })?;

        if let Some(session) = session.as_mut() {
            let now = Utc::now();
            session.messages.push(SessionMessage {
                role: Role::User,
                content: request.prompt.clone(),
                timestamp: now,
                mcp_data: (!mcp_results.is_empty()).then(|| mcp_results.clone()),
            });
            session.messages.push(SessionMessage {
                role: Role::Assistant,
                content: completion.content.clone(),
                timestamp: now,
                mcp_data: None,
            });
        }

        tracing::info!(
            request_id = %request.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "agent request completed"
        );

        Ok(AgentResponse {
            id: request.id,
            content: completion.content,
            mcp_results,
            usage: completion.usage,
            finish_reason: completion.finish_reason,
        })
    }

    /// Gather every referenced tool, resource and prompt concurrently.
    async fn collect_mcp_data(&self, request: &AgentRequest) -> McpResults {
        let arguments = request.context.clone().unwrap_or_else(|| json!({}));

        let tools = join_all(
            request
                .mcp_tools
                .iter()
                .map(|name| self.execute_tool(name, arguments.clone())),
        );
        let resources = join_all(request.mcp_resources.iter().map(|reference| async move {
            let value = self.read_resource_reference(reference).await;
            (reference.clone(), value)
        }));
        let prompts = join_all(request.mcp_prompts.iter().map(|reference| async move {
            let value = self.get_prompt_reference(reference, request.context.clone()).await;
            (reference.clone(), value)
        }));

        let (tools, resources, prompts) = tokio::join!(tools, resources, prompts);

        McpResults {
            tools: (!request.mcp_tools.is_empty()).then(|| {
                request
                    .mcp_tools
                    .iter()
                    .cloned()
                    .zip(tools)
                    .collect::<BTreeMap<_, _>>()
            }),
            resources: (!request.mcp_resources.is_empty())
                .then(|| resources.into_iter().collect()),
            prompts: (!request.mcp_prompts.is_empty()).then(|| prompts.into_iter().collect()),
        }
    }

    async fn execute_tool(&self, name: &str, arguments: Value) -> McpToolResult {
        let start = Instant::now();
        tracing::debug!(tool = name, args = %arguments, "executing MCP tool");

        let outcome = self.client.call_tool(name, arguments).await;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => McpToolResult {
                success: true,
                result: Some(result),
                error: None,
                execution_time_ms,
            },
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "MCP tool execution failed");
                McpToolResult {
                    success: false,
                    result: None,
                    error: Some(e.to_string()),
                    execution_time_ms,
                }
            }
        }
    }

    async fn read_resource_reference(&self, reference: &str) -> Value {
        let outcome = match split_qualified_name(reference) {
            Some((server, uri)) => self
                .client
                .read_resource(server, uri)
                .await
                .map_err(AgentError::from),
            None => Err(AgentError::InvalidReference {
                kind: "resource",
                reference: reference.to_string(),
            }),
        };
        inline_error(outcome, "resource", reference)
    }

    async fn get_prompt_reference(&self, reference: &str, arguments: Option<Value>) -> Value {
        let outcome = match split_qualified_name(reference) {
            Some((server, name)) => self
                .client
                .get_prompt(server, name, arguments)
                .await
                .map_err(AgentError::from),
            None => Err(AgentError::InvalidReference {
                kind: "prompt",
                reference: reference.to_string(),
            }),
        };
        inline_error(outcome, "prompt", reference)
    }

    // ─── Query Helpers ──────────────────────────────────────────────────

    /// Ask with the given tools called using `arguments`.
    pub async fn query_with_mcp_tools(
        &self,
        prompt: &str,
        tools: Vec<String>,
        arguments: Option<Value>,
    ) -> Result<AgentResponse, AgentError> {
        self.process_request(AgentRequest {
            id: generate_id("query"),
            prompt: prompt.to_string(),
            context: Some(arguments.unwrap_or_else(|| json!({}))),
            mcp_tools: tools,
            ..AgentRequest::default()
        })
        .await
    }

    /// Ask with the given `server:uri` resources attached.
    pub async fn query_with_mcp_resources(
        &self,
        prompt: &str,
        resources: Vec<String>,
    ) -> Result<AgentResponse, AgentError> {
        self.process_request(AgentRequest {
            id: generate_id("query"),
            prompt: prompt.to_string(),
            mcp_resources: resources,
            ..AgentRequest::default()
        })
        .await
    }

    /// Ask with the given `server:prompt` templates rendered using `arguments`.
    pub async fn query_with_mcp_prompts(
        &self,
        prompt: &str,
        prompts: Vec<String>,
        arguments: Option<Value>,
    ) -> Result<AgentResponse, AgentError> {
        self.process_request(AgentRequest {
            id: generate_id("query"),
            prompt: prompt.to_string(),
            context: Some(arguments.unwrap_or_else(|| json!({}))),
            mcp_prompts: prompts,
            ..AgentRequest::default()
        })
        .await
    }

    /// Ask, optionally letting keyword overlap pick the MCP items to attach.
    pub async fn smart_query(
        &self,
        prompt: &str,
        options: SmartQueryOptions,
    ) -> Result<AgentResponse, AgentError> {
        let mut request = AgentRequest {
            id: generate_id("smart"),
            prompt: prompt.to_string(),
            context: options.context,
            ..AgentRequest::default()
        };

        if options.auto_select {
            let kw = keywords(prompt);
            let max = options.max_items;

            request.mcp_tools = select_relevant(
                &kw,
                self.client
                    .get_available_tools()
                    .await
                    .into_iter()
                    .map(|t| (t.qualified_name(), format!("{} {}", t.name, t.description))),
                max,
            );
            request.mcp_resources = select_relevant(
                &kw,
                self.client.get_available_resources().await.into_iter().map(|r| {
                    let text = format!("{} {}", r.name, r.description.as_deref().unwrap_or_default());
                    (format!("{}:{}", r.server_id, r.uri), text)
                }),
                max,
            );
            request.mcp_prompts = select_relevant(
                &kw,
                self.client.get_available_prompts().await.into_iter().map(|p| {
                    let text = format!("{} {}", p.name, p.description.as_deref().unwrap_or_default());
                    (p.qualified_name(), text)
                }),
                max,
            );

            tracing::debug!(
                tools = request.mcp_tools.len(),
                resources = request.mcp_resources.len(),
                prompts = request.mcp_prompts.len(),
                "smart query selection"
            );
        }

        self.process_request(request).await
    }

    // ─── Introspection ──────────────────────────────────────────────────

    pub async fn get_mcp_capabilities(&self) -> McpCapabilities {
        McpCapabilities {
            tools: self.client.get_available_tools().await,
            resources: self.client.get_available_resources().await,
            prompts: self.client.get_available_prompts().await,
            connected_servers: self.client.get_connected_servers().await,
        }
    }

    /// Reconnect and rediscover every server. Returns per-server failures.
    pub async fn refresh_mcp_connections(&self) -> Vec<(String, McpError)> {
        let errors = self.client.refresh_all_servers().await;
        tracing::info!(failed_servers = errors.len(), "MCP connections refreshed");
        errors
    }

    /// MCP findings plus model settings and a live model round trip.
    pub async fn run_self_check(&self) -> SelfCheckReport {
        let mut report = SelfCheckReport::new();

        if self.is_initialized() {
            report.pass("Agent initialized");
        } else {
            report.fail("Agent not initialized");
        }

        report.merge(self.client.run_self_check().await);

        match self.settings.load() {
            Ok(settings) => {
                if settings.api_url.trim().is_empty() {
                    report.fail("AI API URL not configured");
                } else {
                    report.pass(format!("AI API URL configured: {}", settings.api_url));
                }
                if settings.model.trim().is_empty() {
                    report.fail("AI model not configured");
                } else {
                    report.pass(format!("AI model configured: {}", settings.model));
                }
            }
            Err(e) => report.fail(format!("settings could not be read: {e}")),
        }

        report.info(format!("Active sessions: {}", self.session_count().await));

        match self
            .model
            .complete(vec![ChatMessage::user(SELF_CHECK_PROMPT)], Sampling::default())
            .await
        {
            Ok(completion) if !completion.content.trim().is_empty() => {
                report.pass("AI model connection working")
            }
            Ok(_) => report.fail("AI model returned empty response"),
            Err(e) => report.fail(format!("AI model connection failed: {e}")),
        }

        report
    }

    pub async fn get_debug_info(&self) -> AgentDebugInfo {
        AgentDebugInfo {
            initialized: self.is_initialized(),
            active_sessions: self.session_count().await,
            mcp_capabilities: self.get_mcp_capabilities().await,
            mcp_debug_info: self.client.get_debug_info().await,
        }
    }

    /// Drop all sessions and dispose the MCP client.
    pub async fn dispose(&self) {
        tracing::info!("disposing agent");
        self.sessions.write().await.clear();
        self.client.dispose().await;
        self.initialized.store(false, Ordering::SeqCst);
    }
}

fn names<T>(items: Vec<T>, f: impl Fn(T) -> String) -> Vec<String> {
    items.into_iter().map(f).collect()
}

/// Collapse a lookup outcome into its value or `{"error": message}`.
fn inline_error(outcome: Result<Value, AgentError>, kind: &str, reference: &str) -> Value {
    match outcome {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(kind, reference, error = %e, "failed to collect MCP item");
            json!({ "error": e.to_string() })
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
