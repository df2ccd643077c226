//! End-to-end exercises of the authorize/approve/deny round trip over the
//! real HTTP router, grounded in the literal scenarios a client bridge
//! relies on: allow-on-read, deny-by-rule, approval-then-token-retry,
//! argument tampering, and lease bypass.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use tg_classifier::Classifier;
use tg_domain::config::Config;
use tg_domain::model::{Agent, PolicyLease, PolicyRule, Upstream, Workspace};
use tg_gateway::api;
use tg_gateway::state::AppState;
use tg_notifier::LogNotifier;
use tg_policy::Evaluator;
use tg_smart_rule::{SmartRuleConfig, SmartRuleEvaluator};
use tg_store::Store;

struct Harness {
    _dir: TempDir,
    workspace_id: Uuid,
    upstream_id: Uuid,
    agent_key: String,
    state: AppState,
}

fn build_harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::new(dir.path()).unwrap());
    let now = chrono::Utc::now();

    let workspace = store
        .insert_workspace(Workspace { id: Uuid::new_v4(), name: "acme".into(), created_at: now })
        .unwrap();
    let upstream = store
        .insert_upstream(Upstream { id: Uuid::new_v4(), workspace_id: workspace.id, name: "mail-server".into(), transport: json!({}), created_at: now })
        .unwrap();

    let agent_key = "sk-test-agent-key".to_string();
    let key_hash = tg_identity::hash_client_key(&agent_key);
    store
        .insert_agent(Agent { id: Uuid::new_v4(), workspace_id: workspace.id, name: "agent-1".into(), client_key_hash: key_hash, last_seen_at: now, created_at: now })
        .unwrap();

    let smart_rule = Arc::new(SmartRuleEvaluator::new(SmartRuleConfig {
        endpoint: None,
        api_key: None,
        model: "unused".into(),
        timeout: Duration::from_secs(1),
    }));
    let evaluator = Arc::new(Evaluator::new(store.clone(), smart_rule));
    let classifier = Arc::new(Classifier::new().unwrap());

    let state = AppState {
        config: Arc::new(Config::default()),
        store,
        classifier,
        evaluator,
        notifier: Arc::new(LogNotifier),
        admin_token_hash: None,
    };

    Harness { _dir: dir, workspace_id: workspace.id, upstream_id: upstream.id, agent_key, state }
}

fn authorize_body(h: &Harness, tool_name: &str, args_hash: &str, request_hash: &str, approval_token: Option<&str>) -> Value {
    json!({
        "workspace_id": h.workspace_id,
        "agent_key": h.agent_key,
        "upstream_id": h.upstream_id,
        "tool_name": tool_name,
        "action_class": "send",
        "risk_level": "med",
        "risk_flags": {},
        "resource": {"recipient": "new@external.example.com", "domain": "external.example.com"},
        "args_hash": args_hash,
        "request_hash": request_hash,
        "args_redacted": {"to": "new@external.example.com"},
        "approval_token": approval_token,
    })
}

async fn post(state: &AppState, path: &str, body: &Value) -> (StatusCode, Value) {
    let app = api::router(state.clone()).with_state(state.clone());
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("x-agent-key", body.get("agent_key").and_then(|v| v.as_str()).unwrap_or(""))
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

async fn get(state: &AppState, path_and_query: &str) -> (StatusCode, Value) {
    let app = api::router(state.clone()).with_state(state.clone());
    let req = Request::builder().method("GET").uri(path_and_query).body(Body::empty()).unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn allows_when_no_rule_or_lease_matches() {
    let h = build_harness();
    let body = authorize_body(&h, "email_send", "hargs1", "hreq1", None);
    let (status, resp) = post(&h.state, "/authorize", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["decision"], "allowed");
}

#[tokio::test]
async fn denies_by_matching_rule() {
    let h = build_harness();
    let now = chrono::Utc::now();
    h.state
        .store
        .insert_rule(PolicyRule {
            id: Uuid::new_v4(),
            workspace_id: h.workspace_id,
            name: Some("deny-email".into()),
            priority: 50,
            enabled: true,
            effect: tg_domain::model::Effect::Deny,
            action_class: tg_domain::model::ActionClass::Send,
            scope: tg_domain::model::ScopeFilters { tool_name: Some("email_send".into()), ..Default::default() },
            smart_condition: None,
            created_at: now,
        })
        .unwrap();

    let body = authorize_body(&h, "email_send", "hargs2", "hreq2", None);
    let (status, resp) = post(&h.state, "/authorize", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["decision"], "denied");
}

#[tokio::test]
async fn active_lease_bypasses_approval_requirement() {
    let h = build_harness();
    let now = chrono::Utc::now();
    h.state
        .store
        .insert_rule(PolicyRule {
            id: Uuid::new_v4(),
            workspace_id: h.workspace_id,
            name: Some("approval-email".into()),
            priority: 50,
            enabled: true,
            effect: tg_domain::model::Effect::RequireApproval,
            action_class: tg_domain::model::ActionClass::Send,
            scope: tg_domain::model::ScopeFilters { tool_name: Some("email_send".into()), ..Default::default() },
            smart_condition: None,
            created_at: now,
        })
        .unwrap();
    // More specific than the blanket approval rule (also scoped by upstream)
    // so it wins the specificity ordering outright, independent of
    // creation-time tie-breaking.
    h.state
        .store
        .insert_lease(PolicyLease {
            id: Uuid::new_v4(),
            workspace_id: h.workspace_id,
            creator: "alice".into(),
            action_class: tg_domain::model::ActionClass::Send,
            scope: tg_domain::model::ScopeFilters {
                tool_name: Some("email_send".into()),
                upstream_id: Some(h.upstream_id),
                ..Default::default()
            },
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
        })
        .unwrap();

    let body = authorize_body(&h, "email_send", "hargs3", "hreq3", None);
    let (status, resp) = post(&h.state, "/authorize", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["decision"], "allowed");
}

#[tokio::test]
async fn approval_then_token_retry_succeeds_exactly_once() {
    let h = build_harness();
    let now = chrono::Utc::now();
    h.state
        .store
        .insert_rule(PolicyRule {
            id: Uuid::new_v4(),
            workspace_id: h.workspace_id,
            name: Some("approval-email".into()),
            priority: 50,
            enabled: true,
            effect: tg_domain::model::Effect::RequireApproval,
            action_class: tg_domain::model::ActionClass::Send,
            scope: tg_domain::model::ScopeFilters { tool_name: Some("email_send".into()), ..Default::default() },
            smart_condition: None,
            created_at: now,
        })
        .unwrap();

    let body = authorize_body(&h, "email_send", "hargs4", "hreq4", None);
    let (status, resp) = post(&h.state, "/authorize", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["decision"], "approval_required");
    let approval_request_id = resp["approval_request_id"].as_str().unwrap().to_string();

    let approve_body = json!({"approval_id": approval_request_id, "approver": "bob"});
    let (status, _resp) = post(&h.state, "/approve", &approve_body).await;
    assert_eq!(status, StatusCode::OK);

    let query = format!(
        "/approval-status?workspace_id={}&agent_key={}&approval_request_id={}",
        h.workspace_id, h.agent_key, approval_request_id
    );
    let (status, resp) = get(&h.state, &query).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["status"], "approved");
    let token = resp["token"].as_str().unwrap().to_string();

    // Second poll must not return the raw token again.
    let (_status, resp2) = get(&h.state, &query).await;
    assert!(resp2["token"].is_null());

    let retry_body = authorize_body(&h, "email_send", "hargs4", "hreq4", Some(&token));
    let (status, resp) = post(&h.state, "/authorize", &retry_body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["decision"], "allowed");

    // The token is single-use: a second redemption attempt must be denied.
    let retry_again = authorize_body(&h, "email_send", "hargs4", "hreq4", Some(&token));
    let (status, resp) = post(&h.state, "/authorize", &retry_again).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["decision"], "denied");
}

#[tokio::test]
async fn tampered_args_hash_is_rejected_on_token_retry() {
    let h = build_harness();
    let now = chrono::Utc::now();
    h.state
        .store
        .insert_rule(PolicyRule {
            id: Uuid::new_v4(),
            workspace_id: h.workspace_id,
            name: Some("approval-email".into()),
            priority: 50,
            enabled: true,
            effect: tg_domain::model::Effect::RequireApproval,
            action_class: tg_domain::model::ActionClass::Send,
            scope: tg_domain::model::ScopeFilters { tool_name: Some("email_send".into()), ..Default::default() },
            smart_condition: None,
            created_at: now,
        })
        .unwrap();

    let body = authorize_body(&h, "email_send", "hargs5", "hreq5", None);
    let (_status, resp) = post(&h.state, "/authorize", &body).await;
    let approval_request_id = resp["approval_request_id"].as_str().unwrap().to_string();

    let approve_body = json!({"approval_id": approval_request_id, "approver": "bob"});
    post(&h.state, "/approve", &approve_body).await;

    let query = format!(
        "/approval-status?workspace_id={}&agent_key={}&approval_request_id={}",
        h.workspace_id, h.agent_key, approval_request_id
    );
    let (_status, resp) = get(&h.state, &query).await;
    let token = resp["token"].as_str().unwrap().to_string();

    // Attacker swaps the args hash between approval and redemption.
    let tampered = authorize_body(&h, "email_send", "hargs5-tampered", "hreq5", Some(&token));
    let (status, resp) = post(&h.state, "/authorize", &tampered).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["decision"], "denied");
}

#[tokio::test]
async fn deny_with_rule_creation_blocks_future_identical_calls() {
    let h = build_harness();
    let now = chrono::Utc::now();
    h.state
        .store
        .insert_rule(PolicyRule {
            id: Uuid::new_v4(),
            workspace_id: h.workspace_id,
            name: Some("approval-email".into()),
            priority: 50,
            enabled: true,
            effect: tg_domain::model::Effect::RequireApproval,
            action_class: tg_domain::model::ActionClass::Send,
            scope: tg_domain::model::ScopeFilters { tool_name: Some("email_send".into()), ..Default::default() },
            smart_condition: None,
            created_at: now,
        })
        .unwrap();

    let body = authorize_body(&h, "email_send", "hargs6", "hreq6", None);
    let (_status, resp) = post(&h.state, "/authorize", &body).await;
    let approval_request_id = resp["approval_request_id"].as_str().unwrap().to_string();

    let deny_body = json!({"approval_id": approval_request_id, "denier": "carol", "createDenyRule": true});
    let (status, _resp) = post(&h.state, "/deny", &deny_body).await;
    assert_eq!(status, StatusCode::OK);

    // A fresh identical call is now denied outright by the new auto-deny rule.
    let retry_body = authorize_body(&h, "email_send", "hargs7", "hreq7", None);
    let (status, resp) = post(&h.state, "/authorize", &retry_body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["decision"], "denied");
}

#[tokio::test]
async fn redact_endpoint_strips_sensitive_values() {
    let h = build_harness();
    let body = json!({"args": {"password": "hunter2", "note": "hi"}});
    let (status, resp) = post(&h.state, "/redact", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["redacted"]["password"], "[REDACTED]");
    assert_eq!(resp["redacted"]["note"], "hi");
}

#[tokio::test]
async fn health_check_is_public() {
    let h = build_harness();
    let app = api::router(h.state.clone()).with_state(h.state.clone());
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
