//! `POST /classify` — lets a client ask the gateway to run the
//! deterministic classifier itself instead of embedding `tg-classifier`.
//! Convenience only: `/authorize` trusts whatever action_class/risk_level/
//! risk_flags/resource the caller supplies, classified here or elsewhere.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use tg_classifier::ClassifyResult;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub tool_name: String,
    pub args: serde_json::Value,
}

pub async fn classify(State(state): State<AppState>, Json(req): Json<ClassifyRequest>) -> Json<ClassifyResult> {
    Json(state.classifier.classify(&req.tool_name, &req.args))
}
