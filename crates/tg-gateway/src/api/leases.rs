//! Active lease listing and revocation, admin-token-gated.

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use tg_domain::model::PolicyLease;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_leases(State(state): State<AppState>, Path(workspace_id): Path<Uuid>) -> Json<Vec<PolicyLease>> {
    Json(state.store.list_active_leases(workspace_id, chrono::Utc::now()))
}

pub async fn delete_lease(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    state.store.delete_lease(id)?;
    Ok(())
}
