//! Structured trace events emitted at each decision point.
//!
//! Every variant is tagged by `event` and logged as a single `tracing::info!`
//! call carrying the serialized event as a field — the same shape a log
//! pipeline can index on without parsing free-form messages.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::{ApprovalStatus, Decision, RiskLevel};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    DecisionRecorded {
        request_id: Uuid,
        workspace_id: Uuid,
        tool_name: String,
        decision: Decision,
        risk_level: RiskLevel,
        #[serde(skip_serializing_if = "Option::is_none")]
        rule_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lease_id: Option<Uuid>,
    },
    ApprovalCreated {
        approval_request_id: Uuid,
        request_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    ApprovalResolved {
        approval_request_id: Uuid,
        status: ApprovalStatus,
        actor: String,
    },
    ApprovalExpired {
        approval_request_id: Uuid,
    },
    TokenIssued {
        approval_request_id: Uuid,
        token_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    TokenConsumed {
        token_id: Uuid,
        tool_name: String,
    },
    TokenConsumeRaced {
        token_id: Uuid,
    },
    TokenRetrieved {
        token_id: Uuid,
    },
    SmartRuleEvaluated {
        rule_id: Uuid,
        request_id: Uuid,
        matched: bool,
        fallback_used: bool,
        latency_ms: u64,
    },
    SmartRuleTimedOut {
        rule_id: Uuid,
        request_id: Uuid,
    },
    NotifierDispatchFailed {
        approval_request_id: Uuid,
        channel: String,
        error: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        tracing::info!(trace_event = %json, "tg_event");
    }
}
