//! Extension settings loading.
//!
//! Settings live in a VS Code style JSONC (or YAML) document under the
//! `pythonRunnerChat` namespace, either as flat dotted keys
//! (`"pythonRunnerChat.mcpServers"`) or as one nested object. Comments and
//! trailing commas are accepted. Environment variables are interpolated into
//! string values of the namespace after parsing, so secrets need not be
//! stored in the file and the rest of the document is left alone.
//!
//! A malformed `mcpServers` entry only rejects that server; the others load.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use json_comments::CommentSettings;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::mcp_client::ServerConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Settings namespace.
pub const NAMESPACE: &str = "pythonRunnerChat";

/// Env var that points directly at a settings file.
pub const SETTINGS_ENV_VAR: &str = "PYRUNNER_CHAT_SETTINGS";

const WORKSPACE_SETTINGS: &str = ".vscode/settings.json";
const USER_SETTINGS_DIR: &str = "python-runner-chat";

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors raised while locating or parsing settings.
#[derive(Debug, Clone, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse settings file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid settings: {reason}")]
    Invalid { reason: String },
}

// ─── Types ───────────────────────────────────────────────────────────────────

/// A `mcpServers` entry that could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedServer {
    /// The entry's `name`, or `mcpServers[<index>]` when it has none.
    pub name: String,
    pub reason: String,
}

/// Verbosity of MCP logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_url() -> String {
    "http://localhost:1234/v1".to_string()
}

fn default_model() -> String {
    "Qwen2.5-7B-Instruct-Q4_K_M".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful Python runner.".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

/// Everything read from the `pythonRunnerChat` namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSettings {
    #[serde(default = "default_true")]
    pub mcp_enabled: bool,
    #[serde(default)]
    pub mcp_servers: Vec<ServerConfig>,
    #[serde(default = "default_true")]
    pub mcp_auto_connect: bool,
    #[serde(default)]
    pub mcp_log_level: LogLevel,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Server entries skipped while parsing.
    #[serde(skip)]
    pub rejected_servers: Vec<RejectedServer>,
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        Self {
            mcp_enabled: true,
            mcp_servers: Vec::new(),
            mcp_auto_connect: true,
            mcp_log_level: LogLevel::Info,
            api_url: default_api_url(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            rejected_servers: Vec::new(),
        }
    }
}

// ─── Provider ────────────────────────────────────────────────────────────────

/// Source of settings. Re-read by consumers whenever they need fresh values.
pub trait SettingsProvider: Send + Sync {
    fn load(&self) -> Result<ExtensionSettings, SettingsError>;
}

/// Fixed, in-memory settings.
impl SettingsProvider for ExtensionSettings {
    fn load(&self) -> Result<ExtensionSettings, SettingsError> {
        Ok(self.clone())
    }
}

/// Settings backed by a file on disk, re-read on every `load`.
///
/// With no path (nothing discovered) the defaults are returned.
#[derive(Debug, Clone, Default)]
pub struct SettingsFile {
    path: Option<PathBuf>,
}

impl SettingsFile {
    /// Use exactly this file.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Locate the settings file starting from `start`.
    pub fn discover(start: &Path) -> Self {
        Self {
            path: find_settings_path(start),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl SettingsProvider for SettingsFile {
    fn load(&self) -> Result<ExtensionSettings, SettingsError> {
        match &self.path {
            Some(path) => load_settings(path),
            None => Ok(ExtensionSettings::default()),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Find the settings file.
///
/// Order: `PYRUNNER_CHAT_SETTINGS`, then `.vscode/settings.json` walking
/// upward from `start`, then the per-user config directory.
pub fn find_settings_path(start: &Path) -> Option<PathBuf> {
    // 1. Explicit env var
    if let Ok(path) = std::env::var(SETTINGS_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{SETTINGS_ENV_VAR} points at a missing file");
    }

    // 2. Workspace settings, walking upward
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(WORKSPACE_SETTINGS);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    // 3. User settings
    dirs::config_dir()
        .map(|d| d.join(USER_SETTINGS_DIR).join("settings.json"))
        .filter(|p| p.exists())
}

/// Read and parse a settings file.
///
/// Files ending in `.yaml`/`.yml` are parsed as YAML, everything else as
/// JSON with comments and trailing commas allowed.
pub fn load_settings(path: &Path) -> Result<ExtensionSettings, SettingsError> {
    let parse_error = |reason: String| SettingsError::Parse {
        path: path.display().to_string(),
        reason,
    };

    let mut raw = std::fs::read_to_string(path).map_err(|e| SettingsError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let document: Value = if is_yaml {
        serde_yaml::from_str(&raw).map_err(|e| parse_error(e.to_string()))?
    } else {
        json_comments::strip_comments_in_place(raw.as_mut_str(), CommentSettings::c_style(), true)
            .map_err(|e| parse_error(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| parse_error(e.to_string()))?
    };

    let settings = parse_settings(document)?;
    tracing::debug!(
        path = %path.display(),
        servers = settings.mcp_servers.len(),
        rejected = settings.rejected_servers.len(),
        "loaded settings"
    );
    Ok(settings)
}

/// Parse a settings document, keeping only keys in the namespace.
///
/// Env vars are interpolated into the namespace's string values. Each
/// `mcpServers` entry is read on its own; bad entries land in
/// `rejected_servers`.
pub fn parse_settings(document: Value) -> Result<ExtensionSettings, SettingsError> {
    let mut scoped = extract_namespace(document)?;
    scoped.values_mut().for_each(interpolate_value);

    let servers = scoped.remove("mcpServers");
    let mut settings: ExtensionSettings =
        serde_json::from_value(Value::Object(scoped)).map_err(|e| SettingsError::Invalid {
            reason: e.to_string(),
        })?;

    if let Some(servers) = servers {
        let (accepted, rejected) = parse_server_entries(servers)?;
        settings.mcp_servers = accepted;
        settings.rejected_servers = rejected;
    }
    Ok(settings)
}

fn parse_server_entries(
    value: Value,
) -> Result<(Vec<ServerConfig>, Vec<RejectedServer>), SettingsError> {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Null => return Ok((Vec::new(), Vec::new())),
        other => {
            return Err(SettingsError::Invalid {
                reason: format!("'mcpServers' must be an array, got {other}"),
            })
        }
    };

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("mcpServers[{index}]"));

        match serde_json::from_value::<ServerConfig>(entry) {
            Ok(config) => accepted.push(config),
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "skipping invalid MCP server entry");
                rejected.push(RejectedServer {
                    name,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok((accepted, rejected))
}

/// Collect the namespace's keys. Flat dotted keys override the nested object.
fn extract_namespace(document: Value) -> Result<Map<String, Value>, SettingsError> {
    let Value::Object(root) = document else {
        return Err(SettingsError::Invalid {
            reason: "settings document must be an object".into(),
        });
    };

    let prefix = format!("{NAMESPACE}.");
    let mut scoped = Map::new();
    let mut flat = Map::new();

    for (key, value) in root {
        if key == NAMESPACE {
            match value {
                Value::Object(nested) => scoped.extend(nested),
                other => {
                    return Err(SettingsError::Invalid {
                        reason: format!("'{NAMESPACE}' must be an object, got {other}"),
                    })
                }
            }
        } else if let Some(name) = key.strip_prefix(&prefix) {
            flat.insert(name.to_string(), value);
        }
    }

    scoped.extend(flat);
    Ok(scoped)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Interpolate every string inside `value`, recursively.
fn interpolate_value(value: &mut Value) {
    match value {
        Value::String(s) if s.contains("${") => *s = interpolate_env_vars(s),
        Value::Array(items) => items.iter_mut().for_each(interpolate_value),
        Value::Object(map) => map.values_mut().for_each(interpolate_value),
        _ => {}
    }
}

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                expr.push(c);
            }
            result.push_str(&resolve_var_expr(&expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::{AuthConfig, Protocol};
    use serde_json::json;

    #[test]
    fn test_defaults_when_namespace_missing() {
        let settings = parse_settings(json!({"editor.fontSize": 14})).unwrap();
        assert!(settings.mcp_enabled);
        assert!(settings.mcp_auto_connect);
        assert!(settings.mcp_servers.is_empty());
        assert_eq!(settings.mcp_log_level, LogLevel::Info);
        assert_eq!(settings.api_url, "http://localhost:1234/v1");
        assert_eq!(settings.max_tokens, 2048);
    }

    #[test]
    fn test_flat_keys() {
        let settings = parse_settings(json!({
            "pythonRunnerChat.mcpEnabled": false,
            "pythonRunnerChat.mcpLogLevel": "debug",
            "pythonRunnerChat.mcpServers": [
                {"name": "calc", "url": "http://localhost:3000/mcp", "retryCount": 1}
            ]
        }))
        .unwrap();
        assert!(!settings.mcp_enabled);
        assert_eq!(settings.mcp_log_level, LogLevel::Debug);
        assert_eq!(settings.mcp_servers.len(), 1);
        assert_eq!(settings.mcp_servers[0].retry_count, 1);
        assert_eq!(settings.mcp_servers[0].timeout, 30_000);
    }

    #[test]
    fn test_nested_object_and_flat_override() {
        let settings = parse_settings(json!({
            "pythonRunnerChat": {"model": "nested", "temperature": 0.2},
            "pythonRunnerChat.model": "flat"
        }))
        .unwrap();
        assert_eq!(settings.model, "flat");
        assert!((settings.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_server_entry_skips_only_that_server() {
        let settings = parse_settings(json!({
            "pythonRunnerChat.mcpServers": [
                {"name": "good", "url": "http://localhost:3000/mcp"},
                {"name": "bad", "url": "http://localhost:3001/mcp", "timeout": "soon"},
                {"url": "http://x/"}
            ]
        }))
        .unwrap();

        assert_eq!(settings.mcp_servers.len(), 1);
        assert_eq!(settings.mcp_servers[0].name, "good");
        let names: Vec<_> = settings.rejected_servers.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["bad", "mcpServers[2]"]);
        assert!(settings.rejected_servers[0].reason.contains("invalid type"));
    }

    #[test]
    fn test_servers_must_be_an_array() {
        let err = parse_settings(json!({"pythonRunnerChat.mcpServers": {"name": "x"}})).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { .. }));
    }

    #[test]
    fn test_load_jsonc_with_comments_and_trailing_commas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                // editor prefs
                "python.defaultInterpreterPath": "${workspaceFolder}/.venv/bin/python",
                /* block comment */
                "pythonRunnerChat.mcpServers": [
                    {"name": "calc", "url": "http://localhost:3000/mcp",},
                ],
            }"#,
        )
        .unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.mcp_servers.len(), 1);
        assert_eq!(settings.mcp_servers[0].name, "calc");
    }

    #[test]
    fn test_interpolation_only_touches_namespace_strings() {
        std::env::set_var("__TEST_MCP_QUOTED__", r#"a"b\c"#);
        let settings = parse_settings(json!({
            "python.defaultInterpreterPath": "${workspaceFolder}/bin",
            "pythonRunnerChat.systemPrompt": "token=${__TEST_MCP_QUOTED__}"
        }))
        .unwrap();
        std::env::remove_var("__TEST_MCP_QUOTED__");

        // Quotes and backslashes from the environment cannot break the document.
        assert_eq!(settings.system_prompt, r#"token=a"b\c"#);
    }

    #[test]
    fn test_load_json_with_env_interpolation() {
        std::env::set_var("__TEST_MCP_TOKEN__", "tok-42");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "pythonRunnerChat.mcpServers": [{
                    "name": "secure",
                    "url": "https://mcp.example.com/rpc",
                    "protocol": "http",
                    "auth": {"type": "bearer", "token": "${__TEST_MCP_TOKEN__}"}
                }]
            }"#,
        )
        .unwrap();

        let settings = SettingsFile::at(&path).load().unwrap();
        std::env::remove_var("__TEST_MCP_TOKEN__");

        let server = &settings.mcp_servers[0];
        assert_eq!(server.protocol, Protocol::Http);
        assert_eq!(
            server.auth,
            Some(AuthConfig::Bearer {
                token: "tok-42".into()
            })
        );
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            "pythonRunnerChat:\n  mcpAutoConnect: false\n  mcpServers:\n    - name: ws-server\n      url: ws://localhost:9000\n      protocol: ws\n",
        )
        .unwrap();

        let settings = load_settings(&path).unwrap();
        assert!(!settings.mcp_auto_connect);
        assert_eq!(settings.mcp_servers[0].protocol, Protocol::Ws);
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let err = load_settings(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[test]
    fn test_settings_file_without_path_yields_defaults() {
        let settings = SettingsFile::default().load().unwrap();
        assert!(settings.mcp_enabled);
    }

    #[test]
    fn test_find_settings_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        let vscode = dir.path().join(".vscode");
        std::fs::create_dir_all(&vscode).unwrap();
        std::fs::write(vscode.join("settings.json"), "{}").unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        // Only meaningful when the env override is unset.
        if std::env::var(SETTINGS_ENV_VAR).is_err() {
            let found = find_settings_path(&nested).unwrap();
            assert_eq!(found, vscode.join("settings.json"));
        }
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__TEST_NONEXISTENT_SETTING__");
        assert_eq!(
            interpolate_env_vars("${__TEST_NONEXISTENT_SETTING__:-fallback}"),
            "fallback"
        );
        assert_eq!(interpolate_env_vars("plain"), "plain");
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/settings.json");
        assert!(!result.starts_with('~'));
        assert!(result.ends_with("/settings.json"));
    }
}
