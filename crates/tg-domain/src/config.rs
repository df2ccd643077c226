//! Layered configuration for the gateway binary.
//!
//! Mirrors the teacher's per-concern submodule pattern (`server.rs`,
//! `observability.rs`, `workspace.rs`): each section is its own struct with
//! a `Default` impl and `serde(default)` fields so a config file only needs
//! to mention what it overrides.

use serde::{Deserialize, Serialize};

fn d_bind_addr() -> String {
    "127.0.0.1:8089".to_string()
}

fn d_state_dir() -> String {
    "./state".to_string()
}

fn d_approval_ttl_secs() -> u64 {
    24 * 3600
}

fn d_token_ttl_secs() -> u64 {
    3600
}

fn d_smart_rule_timeout_ms() -> u64 {
    3_000
}

fn d_log_format() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// `None` disables bearer-token auth (local/dev only); a running server
    /// should always set this via the `TG_API_TOKEN` env var or config.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    pub cors_allow_any_origin: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: d_bind_addr(),
            api_token: None,
            cors_allow_any_origin: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub state_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: d_state_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    pub default_ttl_secs: u64,
    pub token_ttl_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: d_approval_ttl_secs(),
            token_ttl_secs: d_token_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartRuleConfig {
    /// `None` disables smart rules; matching a smart rule then always falls
    /// back to the deterministic keyword-overlap heuristic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for SmartRuleConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_ms: d_smart_rule_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self { webhook_url: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: d_log_format(),
            otlp_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub approval: ApprovalConfig,
    pub smart_rule: SmartRuleConfig,
    pub notifier: NotifierConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl Config {
    /// Non-fatal issues are `Warning`; anything that would make the server
    /// misbehave (not fail to start) is `Error`. Callers decide whether to
    /// abort on `Error` severities — `validate()` itself never panics.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.api_token.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "server.api_token is unset; running without bearer-token auth".into(),
            });
        }
        if self.server.cors_allow_any_origin {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "server.cors_allow_any_origin is enabled".into(),
            });
        }
        if self.store.state_dir.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "store.state_dir must not be empty".into(),
            });
        }
        if self.approval.token_ttl_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "approval.token_ttl_secs must be greater than zero".into(),
            });
        }
        if self.approval.default_ttl_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "approval.default_ttl_secs must be greater than zero".into(),
            });
        }
        if self.smart_rule.endpoint.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "smart_rule.endpoint is unset; smart rules fall back to keyword overlap".into(),
            });
        }
        if self.notifier.webhook_url.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "notifier.webhook_url is unset; approval notifications are log-only".into(),
            });
        }

        issues
    }

    pub fn has_fatal_issues(&self) -> bool {
        self.validate().iter().any(|i| i.severity == ConfigSeverity::Error)
    }
}
