//! Self-check and debug snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::{Protocol, ServerStatus};

/// Severity of one self-check line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingLevel {
    Pass,
    Warn,
    Fail,
    Info,
}

/// One human-readable self-check line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub level: FindingLevel,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.level {
            FindingLevel::Pass => "[ok]",
            FindingLevel::Warn => "[warn]",
            FindingLevel::Fail => "[fail]",
            FindingLevel::Info => "[info]",
        };
        write!(f, "{marker} {}", self.message)
    }
}

/// Outcome of a self-check. `passed` is false iff any finding is `Fail`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SelfCheckReport {
    pub passed: bool,
    pub findings: Vec<Finding>,
}

impl SelfCheckReport {
    pub fn new() -> Self {
        Self {
            passed: true,
            findings: Vec::new(),
        }
    }

    pub fn pass(&mut self, message: impl Into<String>) {
        self.push(FindingLevel::Pass, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(FindingLevel::Warn, message);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.passed = false;
        self.push(FindingLevel::Fail, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(FindingLevel::Info, message);
    }

    /// Append another report's findings, failing this one if it failed.
    pub fn merge(&mut self, other: SelfCheckReport) {
        self.passed &= other.passed;
        self.findings.extend(other.findings);
    }

    fn push(&mut self, level: FindingLevel, message: impl Into<String>) {
        self.findings.push(Finding {
            level,
            message: message.into(),
        });
    }
}

/// Per-server part of [`DebugInfo`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDebugInfo {
    pub name: String,
    pub url: String,
    pub protocol: Protocol,
    pub status: ServerStatus,
    pub connected: bool,
    pub pending_requests: usize,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub tools: usize,
    pub resources: usize,
    pub prompts: usize,
}

/// Serializable snapshot of the whole client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub initialized: bool,
    pub servers: Vec<ServerDebugInfo>,
    pub connected_servers: Vec<String>,
    pub tool_count: usize,
    pub resource_count: usize,
    pub prompt_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_fails_on_any_failure() {
        let mut report = SelfCheckReport::new();
        report.pass("initialized");
        report.warn("no servers");
        assert!(report.passed);

        let mut other = SelfCheckReport::new();
        other.fail("server down");
        report.merge(other);
        assert!(!report.passed);
        assert_eq!(report.findings.len(), 3);
        assert_eq!(report.findings[2].to_string(), "[fail] server down");
    }
}
