//! `POST /authorize` — the single decision point every tool call passes
//! through before and after an approval round-trip.
//!
//! Grounded on `gateway::api::tools::exec_tool` for the handler shape
//! (`State`/`Json` extraction, building a typed response) and on the
//! classification/evaluation/audit pipeline spread across `tg-policy`,
//! `tg-approval`, and `tg-notifier` for the actual decision logic.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tg_approval::ApprovalManager;
use tg_domain::model::{ActionClass, Decision, Request, ResourceMeta, RiskFlags, RiskLevel};
use tg_domain::trace::TraceEvent;
use tg_identity::IdentityResolver;
use tg_notifier::ApprovalNotice;
use tg_policy::PolicyContext;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub workspace_id: Uuid,
    pub agent_key: String,
    pub upstream_id: Uuid,
    pub tool_name: String,
    pub action_class: ActionClass,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub risk_flags: RiskFlags,
    #[serde(default)]
    pub resource: ResourceMeta,
    pub args_hash: String,
    pub request_hash: String,
    #[serde(default = "default_args_redacted")]
    pub args_redacted: serde_json::Value,
    #[serde(default)]
    pub approval_token: Option<String>,
}

fn default_args_redacted() -> serde_json::Value {
    serde_json::Value::Null
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub decision: Decision,
    pub reason: String,
    pub request_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_request_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_rpc_error_code: Option<i64>,
}

pub async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, ApiError> {
    let header_key = headers
        .get("x-agent-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if header_key != req.agent_key {
        return Err(tg_domain::Error::Unauthorized("X-Agent-Key header does not match request body".into()).into());
    }

    let agent = IdentityResolver::new(&state.store).authenticate(req.workspace_id, &req.agent_key)?;
    let now = Utc::now();

    if let Some(raw_token) = req.approval_token.as_deref() {
        return handle_token_retry(&state, &req, agent.id, raw_token, now).map(Json);
    }

    handle_fresh_authorize(&state, &req, agent.id, now).await.map(Json)
}

fn handle_token_retry(
    state: &AppState,
    req: &AuthorizeRequest,
    agent_id: Uuid,
    raw_token: &str,
    now: DateTime<Utc>,
) -> Result<AuthorizeResponse, ApiError> {
    let manager = ApprovalManager::new(&state.store, approval_ttl(state), token_ttl(state));

    let (decision, reason, json_rpc_error_code) =
        match manager.validate_and_consume(raw_token, &req.tool_name, req.upstream_id, &req.args_hash, &req.request_hash, now) {
            Ok(_token) => (Decision::Allowed, "approval token redeemed".to_string(), None),
            Err(denial) => (Decision::Denied, denial.reason(), tg_domain::jsonrpc::code_for(Decision::Denied, true)),
        };

    let request = record_request(state, req, agent_id, decision, Some(reason.clone()), now)?;

    Ok(AuthorizeResponse {
        decision,
        reason,
        request_id: request.id,
        approval_request_id: None,
        expires_at: None,
        approval_url: None,
        json_rpc_error_code,
    })
}

async fn handle_fresh_authorize(
    state: &AppState,
    req: &AuthorizeRequest,
    agent_id: Uuid,
    now: DateTime<Utc>,
) -> Result<AuthorizeResponse, ApiError> {
    let ctx = PolicyContext {
        workspace_id: req.workspace_id,
        tool_name: req.tool_name.clone(),
        upstream_id: req.upstream_id,
        action_class: req.action_class,
        resource: req.resource.clone(),
        risk_flags: req.risk_flags,
        args_redacted: req.args_redacted.clone(),
    };
    let outcome = state.evaluator.evaluate(&ctx, &CancellationToken::new()).await;

    let denial_reason = if outcome.decision == Decision::Denied { Some(outcome.reason.clone()) } else { None };
    let request = record_request(state, req, agent_id, outcome.decision, denial_reason, now)?;

    if outcome.decision != Decision::ApprovalRequired {
        let json_rpc_error_code = tg_domain::jsonrpc::code_for(outcome.decision, false);
        return Ok(AuthorizeResponse {
            decision: outcome.decision,
            reason: outcome.reason,
            request_id: request.id,
            approval_request_id: None,
            expires_at: None,
            approval_url: None,
            json_rpc_error_code,
        });
    }

    let manager = ApprovalManager::new(&state.store, approval_ttl(state), token_ttl(state));
    let approval = manager.create(&request, Some(agent_id), now)?;

    let notifier = state.notifier.clone();
    let notice = ApprovalNotice {
        approval_request_id: approval.id,
        workspace_id: req.workspace_id,
        request_id: request.id,
        tool_name: req.tool_name.clone(),
        risk_level: format!("{:?}", req.risk_level).to_lowercase(),
        reason: outcome.reason.clone(),
        expires_at: approval.expires_at,
    };
    tokio::spawn(async move { notifier.notify(notice).await });

    Ok(AuthorizeResponse {
        decision: Decision::ApprovalRequired,
        reason: outcome.reason,
        request_id: request.id,
        approval_request_id: Some(approval.id),
        expires_at: Some(approval.expires_at),
        approval_url: None,
        json_rpc_error_code: Some(tg_domain::jsonrpc::APPROVAL_REQUIRED),
    })
}

fn record_request(
    state: &AppState,
    req: &AuthorizeRequest,
    agent_id: Uuid,
    decision: Decision,
    denial_reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Request, ApiError> {
    let request = Request {
        id: Uuid::new_v4(),
        workspace_id: req.workspace_id,
        agent_id,
        upstream_id: req.upstream_id,
        tool_name: req.tool_name.clone(),
        action_class: req.action_class,
        risk_level: req.risk_level,
        risk_flags: req.risk_flags,
        resource: req.resource.clone(),
        args_redacted: req.args_redacted.clone(),
        args_hash: req.args_hash.clone(),
        request_hash: req.request_hash.clone(),
        decision,
        denial_reason,
        created_at: now,
    };
    let request = state.store.insert_request(request)?;
    TraceEvent::DecisionRecorded {
        request_id: request.id,
        workspace_id: request.workspace_id,
        tool_name: request.tool_name.clone(),
        decision,
        risk_level: request.risk_level,
        rule_id: None,
        lease_id: None,
    }
    .emit();
    Ok(request)
}

fn approval_ttl(state: &AppState) -> Duration {
    Duration::seconds(state.config.approval.default_ttl_secs as i64)
}

fn token_ttl(state: &AppState) -> Duration {
    Duration::seconds(state.config.approval.token_ttl_secs as i64)
}
