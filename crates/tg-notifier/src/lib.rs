//! Fire-and-forget notification channel to push approval requests to a
//! human reviewer.
//!
//! `notify` must never fail the authorize request and must not hold
//! references into per-request scoped state — callers detach it as a
//! spawned task. Grounded on `gateway::runtime::deliveries::DeliveryStore`:
//! a `tokio::sync::broadcast` channel plus a best-effort external push,
//! generalized into a trait with a couple of concrete shippers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use tg_domain::model::ApprovalStatus;
use tg_domain::trace::TraceEvent;

/// Everything a notifier needs to render an approval prompt. Intentionally
/// thin — the notifier is an external collaborator, not a policy decision
/// point.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalNotice {
    pub approval_request_id: Uuid,
    pub workspace_id: Uuid,
    pub request_id: Uuid,
    pub tool_name: String,
    pub risk_level: String,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Fire-and-forget push of a newly created approval request. Must not
    /// return an error the caller has to act on; failures are logged and
    /// swallowed internally.
    async fn notify(&self, notice: ApprovalNotice);

    /// Informs the channel that an approval request reached a terminal
    /// state, so a previously-sent prompt can be updated/retracted.
    async fn update(&self, approval_request_id: Uuid, final_status: ApprovalStatus, actor_display: &str);
}

/// Always succeeds; logs structured events only. The safe default when no
/// external channel is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: ApprovalNotice) {
        tracing::info!(
            approval_request_id = %notice.approval_request_id,
            tool_name = %notice.tool_name,
            risk_level = %notice.risk_level,
            reason = %notice.reason,
            "approval request pending human review"
        );
    }

    async fn update(&self, approval_request_id: Uuid, final_status: ApprovalStatus, actor_display: &str) {
        tracing::info!(
            approval_request_id = %approval_request_id,
            status = ?final_status,
            actor = %actor_display,
            "approval request resolved"
        );
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierEvent {
    Created(ApprovalNotice),
    Resolved {
        approval_request_id: Uuid,
        status: ApprovalStatus,
        actor: String,
    },
}

/// Broadcasts approval lifecycle events in-process for a dashboard or SSE
/// consumer. Never blocks the caller: a channel with no subscribers simply
/// drops the send.
pub struct BroadcastNotifier {
    tx: tokio::sync::broadcast::Sender<NotifierEvent>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<NotifierEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, notice: ApprovalNotice) {
        let _ = self.tx.send(NotifierEvent::Created(notice));
    }

    async fn update(&self, approval_request_id: Uuid, final_status: ApprovalStatus, actor_display: &str) {
        let _ = self.tx.send(NotifierEvent::Resolved {
            approval_request_id,
            status: final_status,
            actor: actor_display.to_string(),
        });
    }
}

/// Posts a JSON payload to a configured webhook URL on a detached task with
/// a short timeout. Any transport failure is logged via `TraceEvent` and
/// otherwise ignored — an `UpstreamTransient` failure here never surfaces
/// to the authorize caller.
pub struct WebhookNotifier {
    http: reqwest::Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            webhook_url: webhook_url.into(),
        }
    }

    async fn post(&self, body: serde_json::Value, approval_request_id: Uuid) {
        if let Err(err) = self.http.post(&self.webhook_url).json(&body).send().await {
            TraceEvent::NotifierDispatchFailed {
                approval_request_id,
                channel: "webhook".to_string(),
                error: err.to_string(),
            }
            .emit();
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notice: ApprovalNotice) {
        let approval_request_id = notice.approval_request_id;
        let body = serde_json::json!({ "event": "approval_created", "notice": notice });
        self.post(body, approval_request_id).await;
    }

    async fn update(&self, approval_request_id: Uuid, final_status: ApprovalStatus, actor_display: &str) {
        let body = serde_json::json!({
            "event": "approval_resolved",
            "approval_request_id": approval_request_id,
            "status": final_status,
            "actor": actor_display,
        });
        self.post(body, approval_request_id).await;
    }
}
