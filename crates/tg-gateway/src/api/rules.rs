//! Policy rule CRUD, admin-token-gated.
//!
//! Grounded on the teacher's management-surface handlers (list/create/
//! update/delete over a `Store`-backed collection, e.g.
//! `gateway::api::router`'s webhook/schedule handlers) adapted to
//! `PolicyRule`.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use tg_domain::model::{ActionClass, Effect, PolicyRule, ScopeFilters};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_rules(State(state): State<AppState>, Path(workspace_id): Path<Uuid>) -> Json<Vec<PolicyRule>> {
    Json(state.store.list_rules(workspace_id))
}

pub async fn get_rule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<PolicyRule>, ApiError> {
    state
        .store
        .get_rule(id)
        .map(Json)
        .ok_or_else(|| tg_domain::Error::NotFound(format!("rule {id}")).into())
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub workspace_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    pub priority: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub effect: Effect,
    pub action_class: ActionClass,
    #[serde(flatten)]
    pub scope: ScopeFilters,
    #[serde(default)]
    pub smart_condition: Option<String>,
}

fn default_enabled() -> bool {
    true
}

pub async fn create_rule(State(state): State<AppState>, Json(req): Json<CreateRuleRequest>) -> Result<Json<PolicyRule>, ApiError> {
    let rule = PolicyRule {
        id: Uuid::new_v4(),
        workspace_id: req.workspace_id,
        name: req.name,
        priority: req.priority,
        enabled: req.enabled,
        effect: req.effect,
        action_class: req.action_class,
        scope: req.scope,
        smart_condition: req.smart_condition,
        created_at: Utc::now(),
    };
    Ok(Json(state.store.insert_rule(rule)?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRuleRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub priority: u8,
    pub enabled: bool,
    pub effect: Effect,
    pub action_class: ActionClass,
    #[serde(flatten)]
    pub scope: ScopeFilters,
    #[serde(default)]
    pub smart_condition: Option<String>,
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRuleRequest>,
) -> Result<Json<PolicyRule>, ApiError> {
    let existing = state.store.get_rule(id).ok_or_else(|| tg_domain::Error::NotFound(format!("rule {id}")))?;
    let rule = PolicyRule {
        id,
        workspace_id: existing.workspace_id,
        name: req.name,
        priority: req.priority,
        enabled: req.enabled,
        effect: req.effect,
        action_class: req.action_class,
        scope: req.scope,
        smart_condition: req.smart_condition,
        created_at: existing.created_at,
    };
    Ok(Json(state.store.update_rule(rule)?))
}

pub async fn delete_rule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    state.store.delete_rule(id)?;
    Ok(())
}
