//! HTTP surface. Grounded on `gateway::api::mod::router`'s split between a
//! public sub-router and a protected one merged with a `TraceLayer`. Here
//! the split is three-way: public (health), agent-key-authenticated
//! (checked inline, since the workspace isn't known until the body/query is
//! parsed), and admin-token-authenticated (gated by
//! [`auth::require_admin_token`]).

pub mod approval;
pub mod auth;
pub mod authorize;
pub mod classify;
pub mod leases;
pub mod redact;
pub mod rules;

use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(health));

    let agent = Router::new()
        .route("/authorize", post(authorize::authorize))
        .route("/approval-status", get(approval::approval_status))
        .route("/classify", post(classify::classify))
        .route("/redact", post(redact::redact));

    let admin = Router::new()
        .route("/approve", post(approval::approve))
        .route("/deny", post(approval::deny))
        .route("/workspaces/:workspace_id/rules", get(rules::list_rules).post(rules::create_rule))
        .route("/rules/:id", get(rules::get_rule).put(rules::update_rule).delete(rules::delete_rule))
        .route("/workspaces/:workspace_id/leases", get(leases::list_leases))
        .route("/leases/:id", delete(leases::delete_lease))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin_token));

    public
        .merge(agent)
        .merge(admin)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
