//! Capability registry: the unified tool, resource, and prompt maps across all
//! MCP servers.
//!
//! Tools and prompts are keyed by `"{server}:{name}"`; resources by their raw
//! URI. Every refresh replaces one server's entries of one kind wholesale, so
//! repeated discovery never accumulates stale entries.

use std::collections::HashMap;

use super::types::{qualified_name, PromptDescriptor, ResourceDescriptor, ToolDescriptor};

// ─── CapabilityKind ──────────────────────────────────────────────────────────

/// One of the three capability namespaces a server can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Tools,
    Resources,
    Prompts,
}

impl CapabilityKind {
    /// Discovery order used by a full refresh.
    pub const ALL: [CapabilityKind; 3] = [
        CapabilityKind::Tools,
        CapabilityKind::Resources,
        CapabilityKind::Prompts,
    ];

    /// Map a `notifications/*/list_changed` method onto the kind it invalidates.
    pub fn from_list_changed(method: &str) -> Option<Self> {
        use super::types::methods;
        match method {
            methods::TOOLS_LIST_CHANGED => Some(CapabilityKind::Tools),
            methods::RESOURCES_LIST_CHANGED => Some(CapabilityKind::Resources),
            methods::PROMPTS_LIST_CHANGED => Some(CapabilityKind::Prompts),
            _ => None,
        }
    }

    /// The `*/list` method for this kind.
    pub fn list_method(self) -> &'static str {
        use super::types::methods;
        match self {
            CapabilityKind::Tools => methods::TOOLS_LIST,
            CapabilityKind::Resources => methods::RESOURCES_LIST,
            CapabilityKind::Prompts => methods::PROMPTS_LIST,
        }
    }
}

// ─── CapabilityRegistry ──────────────────────────────────────────────────────

/// Aggregated capabilities across all servers.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    /// `"server:name" → tool`.
    tools: HashMap<String, ToolDescriptor>,
    /// `uri → resource`.
    resources: HashMap<String, ResourceDescriptor>,
    /// `"server:name" → prompt`.
    prompts: HashMap<String, PromptDescriptor>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every tool owned by `server` with `tools`.
    pub fn replace_tools(&mut self, server: &str, tools: Vec<ToolDescriptor>) {
        self.tools.retain(|_, t| t.server_id != server);
        for tool in tools {
            self.tools.insert(qualified_name(server, &tool.name), tool);
        }
    }

    /// Replace every resource owned by `server` with `resources`.
    ///
    /// A URI already claimed by another server is taken over by this one.
    pub fn replace_resources(&mut self, server: &str, resources: Vec<ResourceDescriptor>) {
        self.resources.retain(|_, r| r.server_id != server);
        for resource in resources {
            if let Some(previous) = self.resources.get(&resource.uri) {
                tracing::warn!(
                    uri = %resource.uri,
                    previous = %previous.server_id,
                    server,
                    "resource uri exposed by more than one server"
                );
            }
            self.resources.insert(resource.uri.clone(), resource);
        }
    }

    /// Replace every prompt owned by `server` with `prompts`.
    pub fn replace_prompts(&mut self, server: &str, prompts: Vec<PromptDescriptor>) {
        self.prompts.retain(|_, p| p.server_id != server);
        for prompt in prompts {
            self.prompts.insert(qualified_name(server, &prompt.name), prompt);
        }
    }

    /// Drop one kind of capability for `server`.
    pub fn clear_kind(&mut self, server: &str, kind: CapabilityKind) {
        match kind {
            CapabilityKind::Tools => self.tools.retain(|_, t| t.server_id != server),
            CapabilityKind::Resources => self.resources.retain(|_, r| r.server_id != server),
            CapabilityKind::Prompts => self.prompts.retain(|_, p| p.server_id != server),
        }
    }

    /// Remove all capabilities belonging to a server.
    pub fn unregister_server(&mut self, server: &str) {
        for kind in CapabilityKind::ALL {
            self.clear_kind(server, kind);
        }
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.tools.clear();
        self.resources.clear();
        self.prompts.clear();
    }

    /// Look up a tool by its qualified name.
    pub fn get_tool(&self, qualified: &str) -> Option<&ToolDescriptor> {
        self.tools.get(qualified)
    }

    /// All tools, ordered by qualified name.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self.tools.values().cloned().collect();
        tools.sort_by(|a, b| (&a.server_id, &a.name).cmp(&(&b.server_id, &b.name)));
        tools
    }

    /// All resources, ordered by URI.
    pub fn resources(&self) -> Vec<ResourceDescriptor> {
        let mut resources: Vec<ResourceDescriptor> = self.resources.values().cloned().collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    /// All prompts, ordered by qualified name.
    pub fn prompts(&self) -> Vec<PromptDescriptor> {
        let mut prompts: Vec<PromptDescriptor> = self.prompts.values().cloned().collect();
        prompts.sort_by(|a, b| (&a.server_id, &a.name).cmp(&(&b.server_id, &b.name)));
        prompts
    }

    pub fn tools_for_server(&self, server: &str) -> Vec<ToolDescriptor> {
        self.tools().into_iter().filter(|t| t.server_id == server).collect()
    }

    pub fn resources_for_server(&self, server: &str) -> Vec<ResourceDescriptor> {
        self.resources()
            .into_iter()
            .filter(|r| r.server_id == server)
            .collect()
    }

    pub fn prompts_for_server(&self, server: &str) -> Vec<PromptDescriptor> {
        self.prompts().into_iter().filter(|p| p.server_id == server).collect()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.len()
    }

    /// Up to `max_results` qualified tool names close to `name`, best first.
    ///
    /// Compares the part after the server prefix, so `"calc:ad"` suggests
    /// `"calc:add"`.
    pub fn find_similar_tools(&self, name: &str, max_results: usize) -> Vec<String> {
        let query = name.split_once(':').map_or(name, |(_, rest)| rest);

        let mut scored: Vec<(String, f64)> = self
            .tools
            .iter()
            .map(|(key, tool)| (key.clone(), similarity(query, &tool.name)))
            .filter(|(_, score)| *score > 0.3)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(max_results);
        scored.into_iter().map(|(name, _)| name).collect()
    }
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Levenshtein distance over bytes.
fn levenshtein(a: &str, b: &str) -> usize {
    let a = a.as_bytes();
    let b = b.as_bytes();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Normalized similarity in 0.0–1.0.
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(server: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: format!("Test tool: {name}"),
            input_schema: None,
            output_schema: None,
            server_id: server.to_string(),
        }
    }

    fn resource(server: &str, uri: &str) -> ResourceDescriptor {
        ResourceDescriptor {
            uri: uri.to_string(),
            name: uri.to_string(),
            description: None,
            mime_type: None,
            server_id: server.to_string(),
        }
    }

    fn prompt(server: &str, name: &str) -> PromptDescriptor {
        PromptDescriptor {
            name: name.to_string(),
            description: None,
            arguments: vec![],
            server_id: server.to_string(),
        }
    }

    #[test]
    fn test_replace_and_lookup() {
        let mut registry = CapabilityRegistry::new();
        registry.replace_tools("calc", vec![tool("calc", "add")]);

        assert_eq!(registry.tool_count(), 1);
        assert!(registry.get_tool("calc:add").is_some());
        assert!(registry.get_tool("add").is_none());
    }

    #[test]
    fn test_replace_does_not_accumulate() {
        let mut registry = CapabilityRegistry::new();
        registry.replace_tools("calc", vec![tool("calc", "add"), tool("calc", "sub")]);
        registry.replace_tools("calc", vec![tool("calc", "add"), tool("calc", "sub")]);
        assert_eq!(registry.tool_count(), 2);

        registry.replace_tools("calc", vec![tool("calc", "mul")]);
        assert_eq!(registry.tool_count(), 1);
        assert!(registry.get_tool("calc:add").is_none());
    }

    #[test]
    fn test_same_name_on_two_servers() {
        let mut registry = CapabilityRegistry::new();
        registry.replace_tools("a", vec![tool("a", "run")]);
        registry.replace_tools("b", vec![tool("b", "run")]);
        assert_eq!(registry.tool_count(), 2);

        let names: Vec<String> = registry.tools().iter().map(|t| t.qualified_name()).collect();
        assert_eq!(names, vec!["a:run", "b:run"]);
    }

    #[test]
    fn test_unregister_server_purges_all_kinds() {
        let mut registry = CapabilityRegistry::new();
        registry.replace_tools("a", vec![tool("a", "t1")]);
        registry.replace_resources("a", vec![resource("a", "file:///a")]);
        registry.replace_prompts("a", vec![prompt("a", "p1")]);
        registry.replace_tools("b", vec![tool("b", "t2")]);

        registry.unregister_server("a");
        assert!(registry.tools_for_server("a").is_empty());
        assert_eq!(registry.tools_for_server("b").len(), 1);
        assert_eq!(registry.resource_count(), 0);
        assert_eq!(registry.prompt_count(), 0);
    }

    #[test]
    fn test_clear_kind_leaves_other_kinds() {
        let mut registry = CapabilityRegistry::new();
        registry.replace_tools("a", vec![tool("a", "t1")]);
        registry.replace_resources("a", vec![resource("a", "file:///a")]);

        registry.clear_kind("a", CapabilityKind::Resources);
        assert_eq!(registry.resource_count(), 0);
        assert_eq!(registry.tool_count(), 1);
    }

    #[test]
    fn test_resource_uri_collision_last_writer_wins() {
        let mut registry = CapabilityRegistry::new();
        registry.replace_resources("a", vec![resource("a", "mem://shared")]);
        registry.replace_resources("b", vec![resource("b", "mem://shared")]);

        assert_eq!(registry.resource_count(), 1);
        assert_eq!(registry.resources()[0].server_id, "b");

        // Refreshing "a" must not remove b's entry.
        registry.replace_resources("a", vec![]);
        assert_eq!(registry.resource_count(), 1);
    }

    #[test]
    fn test_snapshots_are_copies() {
        let mut registry = CapabilityRegistry::new();
        registry.replace_prompts("a", vec![prompt("a", "p1")]);

        let mut snapshot = registry.prompts();
        snapshot.clear();
        assert_eq!(registry.prompt_count(), 1);
    }

    #[test]
    fn test_per_server_views() {
        let mut registry = CapabilityRegistry::new();
        registry.replace_tools("a", vec![tool("a", "t1"), tool("a", "t2")]);
        registry.replace_tools("b", vec![tool("b", "t3")]);

        assert_eq!(registry.tools_for_server("a").len(), 2);
        assert_eq!(registry.tools_for_server("b").len(), 1);
        assert!(registry.tools_for_server("c").is_empty());
    }

    #[test]
    fn test_kind_from_list_changed() {
        assert_eq!(
            CapabilityKind::from_list_changed("notifications/resources/list_changed"),
            Some(CapabilityKind::Resources)
        );
        assert_eq!(CapabilityKind::from_list_changed("notifications/message"), None);
        assert_eq!(CapabilityKind::Prompts.list_method(), "prompts/list");
    }

    #[test]
    fn test_find_similar_tools() {
        let mut registry = CapabilityRegistry::new();
        registry.replace_tools(
            "calc",
            vec![tool("calc", "add"), tool("calc", "subtract"), tool("calc", "multiply")],
        );

        let similar = registry.find_similar_tools("calc:ad", 3);
        assert_eq!(similar.first().map(String::as_str), Some("calc:add"));
        assert!(registry.find_similar_tools("zzzzzzzz", 3).is_empty());
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert!((similarity("add", "add") - 1.0).abs() < f64::EPSILON);
    }
}
