//! Enriched prompt construction and keyword relevance scoring.

use std::fmt::Write;

use serde::Serialize;

use crate::mcp_client::{PromptDescriptor, ResourceDescriptor, ToolDescriptor};

use super::types::McpResults;

// ─── Enriched Prompt ────────────────────────────────────────────────────────

/// Append the collected MCP data and the available capabilities to `prompt`.
///
/// Each section is only present when it has content.
pub fn build_enriched_prompt(
    prompt: &str,
    results: &McpResults,
    tools: &[ToolDescriptor],
    resources: &[ResourceDescriptor],
    prompts: &[PromptDescriptor],
) -> String {
    let mut out = prompt.to_string();

    if !results.is_empty() {
        out.push_str("\n\n--- MCP Data ---\n");
        if let Some(tools) = &results.tools {
            out.push_str("\nTool Results:\n");
            for (name, result) in tools {
                push_entry(&mut out, name, result);
            }
        }
        if let Some(resources) = &results.resources {
            out.push_str("\nResource Data:\n");
            for (reference, data) in resources {
                push_entry(&mut out, reference, data);
            }
        }
        if let Some(prompts) = &results.prompts {
            out.push_str("\nPrompt Templates:\n");
            for (reference, template) in prompts {
                push_entry(&mut out, reference, template);
            }
        }
        out.push_str("\n--- End MCP Data ---\n");
    }

    if tools.is_empty() && resources.is_empty() && prompts.is_empty() {
        return out;
    }

    out.push_str("\n\n--- Available MCP Capabilities ---\n");
    if !tools.is_empty() {
        out.push_str("\nAvailable Tools:\n");
        for tool in tools {
            let _ = writeln!(out, "- {}: {}", tool.qualified_name(), tool.description);
        }
    }
    if !resources.is_empty() {
        out.push_str("\nAvailable Resources:\n");
        for resource in resources {
            let label = resource.description.as_deref().unwrap_or(&resource.name);
            let _ = writeln!(out, "- {}: {}", resource.uri, label);
        }
    }
    if !prompts.is_empty() {
        out.push_str("\nAvailable Prompts:\n");
        for prompt in prompts {
            let _ = writeln!(
                out,
                "- {}: {}",
                prompt.qualified_name(),
                prompt.description.as_deref().unwrap_or_default()
            );
        }
    }
    out.push_str("\n--- End MCP Capabilities ---\n");

    out
}

fn push_entry<T: Serialize>(out: &mut String, key: &str, value: &T) {
    let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<{e}>"));
    let _ = write!(out, "\n{key}: {rendered}\n");
}

// ─── Relevance ──────────────────────────────────────────────────────────────

/// Lowercased whitespace-separated words of a prompt.
pub fn keywords(prompt: &str) -> Vec<String> {
    prompt
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Number of keywords that occur in `text` (case-insensitive substring match).
pub fn relevance_score(keywords: &[String], text: &str) -> usize {
    let text = text.to_lowercase();
    keywords.iter().filter(|k| text.contains(k.as_str())).count()
}

/// Pick up to `max` references whose text scores above zero, best first.
///
/// `items` yields `(reference, searchable text)` pairs. Ties keep input order.
pub fn select_relevant<I>(keywords: &[String], items: I, max: usize) -> Vec<String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut scored: Vec<(usize, String)> = items
        .into_iter()
        .map(|(reference, text)| (relevance_score(keywords, &text), reference))
        .filter(|(score, _)| *score > 0)
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(max).map(|(_, r)| r).collect()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::McpToolResult;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn tool(server: &str, name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: description.into(),
            input_schema: None,
            output_schema: None,
            server_id: server.into(),
        }
    }

    #[test]
    fn test_plain_prompt_unchanged_without_data_or_capabilities() {
        let out = build_enriched_prompt("hello", &McpResults::default(), &[], &[], &[]);
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_enriched_prompt_sections() {
        let mut tools = BTreeMap::new();
        tools.insert(
            "calc:add".to_string(),
            McpToolResult {
                success: true,
                result: Some(json!(3)),
                error: None,
                execution_time_ms: 1,
            },
        );
        let mut resources = BTreeMap::new();
        resources.insert("docs:file:///a".to_string(), json!({"error": "boom"}));
        let results = McpResults {
            tools: Some(tools),
            resources: Some(resources),
            prompts: None,
        };
        let resource = ResourceDescriptor {
            uri: "file:///a".into(),
            name: "a".into(),
            description: None,
            mime_type: None,
            server_id: "docs".into(),
        };

        let out = build_enriched_prompt(
            "sum it",
            &results,
            &[tool("calc", "add", "adds numbers")],
            &[resource],
            &[],
        );

        assert!(out.starts_with("sum it\n\n--- MCP Data ---\n"));
        assert!(out.contains("\nTool Results:\n"));
        assert!(out.contains("\ncalc:add: {\n"));
        assert!(out.contains("\"boom\""));
        assert!(!out.contains("Prompt Templates"));
        assert!(out.contains("- calc:add: adds numbers\n"));
        assert!(out.contains("- file:///a: a\n"));
        assert!(!out.contains("Available Prompts"));
        assert!(out.ends_with("--- End MCP Capabilities ---\n"));
    }

    #[test]
    fn test_select_relevant_orders_by_score_and_caps() {
        let kw = keywords("Read the weather forecast for Paris");
        let picked = select_relevant(
            &kw,
            vec![
                ("a:stocks".to_string(), "stock prices".to_string()),
                ("a:weather".to_string(), "weather forecast by city".to_string()),
                ("a:forecast".to_string(), "sales forecast".to_string()),
            ],
            1,
        );
        assert_eq!(picked, vec!["a:weather"]);
    }

    #[test]
    fn test_select_relevant_drops_zero_scores() {
        let kw = keywords("translate text");
        let picked = select_relevant(&kw, vec![("a:add".to_string(), "adds numbers".to_string())], 3);
        assert!(picked.is_empty());
    }

    #[test]
    fn test_relevance_is_case_insensitive() {
        assert_eq!(relevance_score(&keywords("WEATHER"), "Weather Tool"), 1);
    }
}
