//! Core entities shared by every crate in the gateway.
//!
//! These types carry no behavior beyond small, obviously-total helpers
//! (`is_smart`, `is_active`, `is_terminal`). Matching, specificity, and
//! state-transition logic live in the crates that own those concerns
//! (`tg-policy`, `tg-approval`) so this crate stays a plain data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace / Agent / Upstream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// An authenticated caller. `client_key_hash` is a 256-bit hex digest of the
/// raw client key; the raw key itself is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub client_key_hash: String,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// An opaque tool-server identity. The evaluator only ever matches on `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upstream {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub transport: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action class / risk / resource
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    Read,
    Write,
    Send,
    Execute,
    Submit,
    TransferValue,
    /// Only valid on a `PolicyRule`; matches every action class. Never a
    /// valid action class for a `PolicyLease` or a classified request.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Med,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskFlags {
    pub external_domain: bool,
    pub new_recipient: bool,
    pub attachment: bool,
    pub form_submit: bool,
    pub shell_exec: bool,
    pub destructive: bool,
}

impl RiskFlags {
    pub fn count(&self) -> u8 {
        [
            self.external_domain,
            self.new_recipient,
            self.attachment,
            self.form_submit,
            self.shell_exec,
            self.destructive,
        ]
        .iter()
        .filter(|b| **b)
        .count() as u8
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy rules & leases
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
    RequireApproval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainMatchType {
    Exact,
    Suffix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFilter {
    pub pattern: String,
    pub match_type: DomainMatchType,
}

/// A rule's optional scope filters. A smart rule (`smart_condition` set)
/// ignores `domain`/`recipient` — only `upstream_id`/`tool_name` apply as a
/// cheap pre-filter before the smart-rule evaluator runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: Uuid,
    pub workspace_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 0-100, higher wins ties are broken by recency, not priority magnitude
    /// beyond this field's own comparisons in the specificity key.
    pub priority: u8,
    pub enabled: bool,
    pub effect: Effect,
    pub action_class: ActionClass,
    #[serde(flatten)]
    pub scope: ScopeFilters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_condition: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PolicyRule {
    /// A rule with a non-empty smart condition ignores domain/recipient
    /// filters; only its upstream/tool-name scope is a valid pre-filter.
    pub fn is_smart(&self) -> bool {
        self.smart_condition
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }
}

/// A time-bounded allowance that bypasses the approval requirement for
/// calls matching its scope. Action class is always constrained — never
/// `Any`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyLease {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub creator: String,
    pub action_class: ActionClass,
    #[serde(flatten)]
    pub scope: ScopeFilters,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PolicyLease {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audit request record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Denied,
    ApprovalRequired,
}

/// Immutable once inserted. The permanent audit trail of an authorize call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub agent_id: Uuid,
    pub upstream_id: Uuid,
    pub tool_name: String,
    pub action_class: ActionClass,
    pub risk_level: RiskLevel,
    pub risk_flags: RiskFlags,
    pub resource: ResourceMeta,
    pub args_redacted: serde_json::Value,
    pub args_hash: String,
    pub request_hash: String,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub identity: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub workspace_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    pub request_id: Uuid,
    pub status: ApprovalStatus,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<Actor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denier: Option<Actor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifier_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// Expiry is evaluated at read time; this does not mutate `status`.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ApprovalStatus {
        if self.status == ApprovalStatus::Pending && now > self.expires_at {
            ApprovalStatus::Expired
        } else {
            self.status
        }
    }
}

/// A single-use secret bound to one specific (tool, upstream, args-hash,
/// request-hash). `raw_token` is cleared after first polling retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalToken {
    pub id: Uuid,
    pub approval_request_id: Uuid,
    pub token_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_token: Option<String>,
    pub request_hash: String,
    pub tool_name: String,
    pub upstream_id: Uuid,
    pub args_hash: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    /// The binding quadruple that must match exactly at redemption.
    pub fn binding_matches(&self, tool_name: &str, upstream_id: Uuid, args_hash: &str, request_hash: &str) -> bool {
        self.tool_name == tool_name
            && self.upstream_id == upstream_id
            && self.args_hash == args_hash
            && self.request_hash == request_hash
    }
}
