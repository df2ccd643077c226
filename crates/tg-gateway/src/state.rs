//! Shared application state threaded through every handler.
//!
//! Grounded on `sa_gateway::state::AppState`: one `Clone`-able struct of
//! `Arc`-wrapped services, grouped by concern with section-header comments.

use std::sync::Arc;

use tg_classifier::Classifier;
use tg_domain::config::Config;
use tg_notifier::Notifier;
use tg_policy::Evaluator;
use tg_store::Store;

#[derive(Clone)]
pub struct AppState {
    // ── Config ───────────────────────────────────────────────
    pub config: Arc<Config>,

    // ── Core services ────────────────────────────────────────
    pub store: Arc<Store>,
    pub classifier: Arc<Classifier>,
    pub evaluator: Arc<Evaluator>,
    pub notifier: Arc<dyn Notifier>,

    // ── Auth ─────────────────────────────────────────────────
    /// Bearer-token digest gating `/approve`, `/deny`, and rule/lease CRUD.
    /// `None` disables admin auth (dev mode).
    pub admin_token_hash: Option<Vec<u8>>,
}
