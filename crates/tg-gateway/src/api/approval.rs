//! Approval lifecycle endpoints: the agent-side poll and the human-side
//! approve/deny actions.
//!
//! `GET /approval-status` is agent-key-authenticated inline (the caller's
//! workspace is only known once the query string is parsed, so it cannot go
//! through the generic admin middleware). `POST /approve` and `POST /deny`
//! sit behind [`crate::api::auth::require_admin_token`].

use axum::extract::{Query, State};
use axum::Json;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tg_approval::ApprovalManager;
use tg_domain::model::ApprovalStatus;
use tg_identity::{require_same_workspace, IdentityResolver};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ApprovalStatusQuery {
    pub workspace_id: Uuid,
    pub agent_key: String,
    pub approval_request_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ApprovalStatusResponse {
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub token_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub async fn approval_status(
    State(state): State<AppState>,
    Query(query): Query<ApprovalStatusQuery>,
) -> Result<Json<ApprovalStatusResponse>, ApiError> {
    let agent = IdentityResolver::new(&state.store).authenticate(query.workspace_id, &query.agent_key)?;

    let approval = state
        .store
        .get_approval_request(query.approval_request_id)
        .ok_or_else(|| tg_domain::Error::NotFound(format!("approval request {}", query.approval_request_id)))?;
    require_same_workspace(query.workspace_id, approval.workspace_id)?;
    if approval.agent_id.is_some_and(|id| id != agent.id) {
        return Err(tg_domain::Error::NotFound(format!("approval request {}", query.approval_request_id)).into());
    }

    let manager = ApprovalManager::new(&state.store, approval_ttl(&state), token_ttl(&state));
    let poll = manager.poll(query.approval_request_id, chrono::Utc::now())?;

    Ok(Json(ApprovalStatusResponse {
        status: poll.status,
        token_available: poll.token.is_some(),
        token: poll.token,
        expires_at: poll.expires_at,
        message: status_message(poll.status),
    }))
}

fn status_message(status: ApprovalStatus) -> Option<String> {
    match status {
        ApprovalStatus::Pending => Some("waiting for a human reviewer".to_string()),
        ApprovalStatus::Denied => Some("denied by a human reviewer".to_string()),
        ApprovalStatus::Expired => Some("approval window expired before a reviewer responded".to_string()),
        ApprovalStatus::Approved => None,
    }
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub approval_id: Uuid,
    pub approver: String,
    #[serde(default, rename = "createLease")]
    pub create_lease: bool,
    #[serde(default, rename = "leaseDurationMinutes")]
    pub lease_duration_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ApproveResponse {
    pub approval_id: Uuid,
    pub status: ApprovalStatus,
}

pub async fn approve(
    State(state): State<AppState>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<ApproveResponse>, ApiError> {
    let manager = ApprovalManager::new(&state.store, approval_ttl(&state), token_ttl(&state));
    let lease = req.create_lease.then(|| tg_approval::LeaseOptions {
        duration: Duration::minutes(req.lease_duration_minutes.unwrap_or(60)),
    });

    let (approval, _raw_token) = manager.approve(req.approval_id, &req.approver, chrono::Utc::now(), lease)?;

    let notifier = state.notifier.clone();
    let approval_id = approval.id;
    let approver = req.approver.clone();
    tokio::spawn(async move { notifier.update(approval_id, ApprovalStatus::Approved, &approver).await });

    Ok(Json(ApproveResponse { approval_id: approval.id, status: approval.status }))
}

#[derive(Debug, Deserialize)]
pub struct DenyRequest {
    pub approval_id: Uuid,
    pub denier: String,
    #[serde(default, rename = "createDenyRule")]
    pub create_deny_rule: bool,
}

#[derive(Debug, Serialize)]
pub struct DenyResponse {
    pub approval_id: Uuid,
    pub status: ApprovalStatus,
}

pub async fn deny(State(state): State<AppState>, Json(req): Json<DenyRequest>) -> Result<Json<DenyResponse>, ApiError> {
    let manager = ApprovalManager::new(&state.store, approval_ttl(&state), token_ttl(&state));
    let approval = manager.deny(req.approval_id, &req.denier, chrono::Utc::now(), req.create_deny_rule)?;

    let notifier = state.notifier.clone();
    let approval_id = approval.id;
    let denier = req.denier.clone();
    tokio::spawn(async move { notifier.update(approval_id, ApprovalStatus::Denied, &denier).await });

    Ok(Json(DenyResponse { approval_id: approval.id, status: approval.status }))
}

fn approval_ttl(state: &AppState) -> Duration {
    Duration::seconds(state.config.approval.default_ttl_secs as i64)
}

fn token_ttl(state: &AppState) -> Duration {
    Duration::seconds(state.config.approval.token_ttl_secs as i64)
}
