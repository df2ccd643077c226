//! `POST /redact` — lets a client ask the gateway to run the canonical
//! redactor itself instead of embedding `tg-redaction`. Convenience only:
//! `/authorize` trusts whatever `args_redacted` the caller supplies,
//! redacted here or elsewhere — the gateway never re-derives it from raw
//! arguments it was not given.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use tg_redaction::RedactionOutput;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RedactRequest {
    pub args: serde_json::Value,
}

pub async fn redact(State(_state): State<AppState>, Json(req): Json<RedactRequest>) -> Result<Json<RedactionOutput>, ApiError> {
    let output = tg_redaction::redact(&req.args).map_err(|err| tg_domain::Error::BadRequest(err.to_string()))?;
    Ok(Json(output))
}
