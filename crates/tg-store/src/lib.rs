//! Transactional primitives backing the evaluator, approval manager, and
//! admin endpoints.
//!
//! One JSON snapshot file under a configured state directory, loaded at
//! construction and rewritten on every mutation — the same shape as the
//! teacher's session store, scaled up to the handful of entity maps this
//! gateway owns. All mutation methods take the write lock for their whole
//! check-then-mutate sequence, which is what makes `try_consume_token` an
//! atomic compare-and-swap without any database underneath.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tg_domain::model::{Actor, Agent, ApprovalRequest, ApprovalStatus, ApprovalToken, PolicyLease, PolicyRule, Request, Upstream, Workspace};
use tg_domain::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    workspaces: HashMap<Uuid, Workspace>,
    #[serde(default)]
    agents: HashMap<Uuid, Agent>,
    #[serde(default)]
    upstreams: HashMap<Uuid, Upstream>,
    #[serde(default)]
    rules: HashMap<Uuid, PolicyRule>,
    #[serde(default)]
    leases: HashMap<Uuid, PolicyLease>,
    #[serde(default)]
    requests: HashMap<Uuid, Request>,
    #[serde(default)]
    approval_requests: HashMap<Uuid, ApprovalRequest>,
    #[serde(default)]
    approval_tokens: HashMap<Uuid, ApprovalToken>,
}

pub struct Store {
    path: PathBuf,
    data: RwLock<StoreData>,
}

impl Store {
    pub fn new(state_dir: impl AsRef<Path>) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join("store.json");
        let data = if path.exists() {
            let text = fs::read_to_string(&path)?;
            serde_json::from_str(&text).unwrap_or_default()
        } else {
            StoreData::default()
        };
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn flush(&self, data: &StoreData) -> Result<()> {
        let text = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, text)?;
        Ok(())
    }

    // ---- workspaces / agents / upstreams ----

    pub fn insert_workspace(&self, workspace: Workspace) -> Result<Workspace> {
        let mut data = self.data.write();
        data.workspaces.insert(workspace.id, workspace.clone());
        self.flush(&data)?;
        Ok(workspace)
    }

    pub fn get_workspace(&self, id: Uuid) -> Option<Workspace> {
        self.data.read().workspaces.get(&id).cloned()
    }

    pub fn insert_agent(&self, agent: Agent) -> Result<Agent> {
        let mut data = self.data.write();
        data.agents.insert(agent.id, agent.clone());
        self.flush(&data)?;
        Ok(agent)
    }

    /// Finds the agent whose `(workspace_id, client_key_hash)` matches.
    pub fn find_agent_by_key_hash(&self, workspace_id: Uuid, client_key_hash: &str) -> Option<Agent> {
        self.data
            .read()
            .agents
            .values()
            .find(|a| a.workspace_id == workspace_id && a.client_key_hash == client_key_hash)
            .cloned()
    }

    pub fn touch_agent_last_seen(&self, agent_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut data = self.data.write();
        if let Some(agent) = data.agents.get_mut(&agent_id) {
            agent.last_seen_at = now;
        }
        self.flush(&data)
    }

    pub fn insert_upstream(&self, upstream: Upstream) -> Result<Upstream> {
        let mut data = self.data.write();
        data.upstreams.insert(upstream.id, upstream.clone());
        self.flush(&data)?;
        Ok(upstream)
    }

    pub fn get_upstream(&self, id: Uuid) -> Option<Upstream> {
        self.data.read().upstreams.get(&id).cloned()
    }

    // ---- rules ----

    pub fn list_enabled_rules(&self, workspace_id: Uuid) -> Vec<PolicyRule> {
        let data = self.data.read();
        let mut rules: Vec<PolicyRule> = data
            .rules
            .values()
            .filter(|r| r.workspace_id == workspace_id && r.enabled)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.created_at);
        rules
    }

    /// All rules for a workspace regardless of `enabled`, for management
    /// listings. The evaluator always goes through `list_enabled_rules`.
    pub fn list_rules(&self, workspace_id: Uuid) -> Vec<PolicyRule> {
        let data = self.data.read();
        let mut rules: Vec<PolicyRule> = data.rules.values().filter(|r| r.workspace_id == workspace_id).cloned().collect();
        rules.sort_by_key(|r| r.created_at);
        rules
    }

    pub fn get_rule(&self, id: Uuid) -> Option<PolicyRule> {
        self.data.read().rules.get(&id).cloned()
    }

    pub fn insert_rule(&self, rule: PolicyRule) -> Result<PolicyRule> {
        let mut data = self.data.write();
        data.rules.insert(rule.id, rule.clone());
        self.flush(&data)?;
        Ok(rule)
    }

    pub fn update_rule(&self, rule: PolicyRule) -> Result<PolicyRule> {
        let mut data = self.data.write();
        if !data.rules.contains_key(&rule.id) {
            return Err(Error::NotFound(format!("rule {}", rule.id)));
        }
        data.rules.insert(rule.id, rule.clone());
        self.flush(&data)?;
        Ok(rule)
    }

    pub fn delete_rule(&self, id: Uuid) -> Result<()> {
        let mut data = self.data.write();
        if data.rules.remove(&id).is_none() {
            return Err(Error::NotFound(format!("rule {id}")));
        }
        self.flush(&data)
    }

    // ---- leases ----

    pub fn list_active_leases(&self, workspace_id: Uuid, now: DateTime<Utc>) -> Vec<PolicyLease> {
        let data = self.data.read();
        let mut leases: Vec<PolicyLease> = data
            .leases
            .values()
            .filter(|l| l.workspace_id == workspace_id && l.is_active(now))
            .cloned()
            .collect();
        leases.sort_by_key(|l| l.created_at);
        leases
    }

    pub fn insert_lease(&self, lease: PolicyLease) -> Result<PolicyLease> {
        let mut data = self.data.write();
        data.leases.insert(lease.id, lease.clone());
        self.flush(&data)?;
        Ok(lease)
    }

    pub fn delete_lease(&self, id: Uuid) -> Result<()> {
        let mut data = self.data.write();
        if data.leases.remove(&id).is_none() {
            return Err(Error::NotFound(format!("lease {id}")));
        }
        self.flush(&data)
    }

    // ---- audit requests ----

    pub fn insert_request(&self, request: Request) -> Result<Request> {
        let mut data = self.data.write();
        data.requests.insert(request.id, request.clone());
        self.flush(&data)?;
        Ok(request)
    }

    pub fn get_request(&self, id: Uuid) -> Option<Request> {
        self.data.read().requests.get(&id).cloned()
    }

    // ---- approval requests ----

    pub fn insert_approval_request(&self, approval: ApprovalRequest) -> Result<ApprovalRequest> {
        let mut data = self.data.write();
        data.approval_requests.insert(approval.id, approval.clone());
        self.flush(&data)?;
        Ok(approval)
    }

    pub fn get_approval_request(&self, id: Uuid) -> Option<ApprovalRequest> {
        self.data.read().approval_requests.get(&id).cloned()
    }

    /// Transitions status away from `pending`. Rejects any call on an
    /// already-terminal request with "already `<status>`" — terminal
    /// statuses never regress.
    pub fn resolve_approval_request(
        &self,
        id: Uuid,
        new_status: ApprovalStatus,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest> {
        let mut data = self.data.write();
        let effective = {
            let approval = data
                .approval_requests
                .get(&id)
                .ok_or_else(|| Error::NotFound(format!("approval request {id}")))?;
            approval.effective_status(now)
        };
        if effective != ApprovalStatus::Pending {
            return Err(Error::Conflict(format!("already {effective:?}").to_lowercase()));
        }
        let approval = data.approval_requests.get_mut(&id).expect("checked above");
        approval.status = new_status;
        match new_status {
            ApprovalStatus::Approved => approval.approver = Some(actor),
            ApprovalStatus::Denied => approval.denier = Some(actor),
            _ => {}
        }
        let result = approval.clone();
        self.flush(&data)?;
        Ok(result)
    }

    /// Read-time expiry: if a pending request's deadline has passed, persist
    /// the `expired` transition and return the updated view. Not required
    /// for correctness (`effective_status` already reflects this), only for
    /// callers that want the on-disk status to catch up.
    pub fn lazily_expire(&self, id: Uuid, now: DateTime<Utc>) -> Option<ApprovalRequest> {
        let mut data = self.data.write();
        let approval = data.approval_requests.get_mut(&id)?;
        if approval.status == ApprovalStatus::Pending && now > approval.expires_at {
            approval.status = ApprovalStatus::Expired;
        }
        let result = approval.clone();
        let _ = self.flush(&data);
        Some(result)
    }

    // ---- approval tokens ----

    pub fn insert_approval_token(&self, token: ApprovalToken) -> Result<ApprovalToken> {
        let mut data = self.data.write();
        data.approval_tokens.insert(token.id, token.clone());
        self.flush(&data)?;
        Ok(token)
    }

    pub fn find_token_by_hash(&self, token_hash: &str) -> Option<ApprovalToken> {
        self.data
            .read()
            .approval_tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned()
    }

    /// Each approval request issues at most one token, so this is a
    /// straightforward reverse lookup for the polling interface.
    pub fn find_token_by_approval_request_id(&self, approval_request_id: Uuid) -> Option<ApprovalToken> {
        self.data
            .read()
            .approval_tokens
            .values()
            .find(|t| t.approval_request_id == approval_request_id)
            .cloned()
    }

    /// Atomic compare-and-swap: flips `consumed_at` from `None` to `now`
    /// exactly once. Returns `None` if the token is unknown or already
    /// consumed — the caller treats that as "raced, already used".
    pub fn try_consume_token(&self, token_id: Uuid, now: DateTime<Utc>) -> Option<ApprovalToken> {
        let mut data = self.data.write();
        let token = data.approval_tokens.get_mut(&token_id)?;
        if token.consumed_at.is_some() {
            return None;
        }
        token.consumed_at = Some(now);
        let result = token.clone();
        if let Err(err) = self.flush(&data) {
            tracing::warn!(error = %err, token_id = %token_id, "failed to persist token consumption");
        }
        Some(result)
    }

    /// First poll after approval clears and returns the raw token; every
    /// subsequent poll sees `None` even though the token row still exists.
    pub fn take_raw_token_once(&self, token_id: Uuid, now: DateTime<Utc>) -> Option<String> {
        let mut data = self.data.write();
        let token = data.approval_tokens.get_mut(&token_id)?;
        if token.retrieved_at.is_some() {
            return None;
        }
        let raw = token.raw_token.take();
        token.retrieved_at = Some(now);
        let _ = self.flush(&data);
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;
    use tg_domain::model::{ActionClass, Effect, ScopeFilters};

    fn sample_token(now: DateTime<Utc>) -> ApprovalToken {
        ApprovalToken {
            id: Uuid::new_v4(),
            approval_request_id: Uuid::new_v4(),
            token_hash: "hash".into(),
            raw_token: Some("raw".into()),
            request_hash: "r1".into(),
            tool_name: "email_send".into(),
            upstream_id: Uuid::new_v4(),
            args_hash: "h1".into(),
            expires_at: now + Duration::hours(1),
            consumed_at: None,
            retrieved_at: None,
            created_at: now,
        }
    }

    fn sample_rule(workspace_id: Uuid, now: DateTime<Utc>) -> PolicyRule {
        PolicyRule {
            id: Uuid::new_v4(),
            workspace_id,
            name: None,
            priority: 10,
            enabled: true,
            effect: Effect::Deny,
            action_class: ActionClass::Execute,
            scope: ScopeFilters::default(),
            smart_condition: None,
            created_at: now,
        }
    }

    #[test]
    fn rule_listing_is_scoped_to_workspace_and_enabled_only() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let ws_a = Uuid::new_v4();
        let ws_b = Uuid::new_v4();
        let now = Utc::now();

        store.insert_rule(sample_rule(ws_a, now)).unwrap();
        let mut disabled = sample_rule(ws_a, now);
        disabled.enabled = false;
        store.insert_rule(disabled).unwrap();
        store.insert_rule(sample_rule(ws_b, now)).unwrap();

        assert_eq!(store.list_enabled_rules(ws_a).len(), 1);
        assert_eq!(store.list_enabled_rules(ws_b).len(), 1);
    }

    #[test]
    fn token_consumption_is_single_use() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let now = Utc::now();
        let token = store.insert_approval_token(sample_token(now)).unwrap();

        let first = store.try_consume_token(token.id, now);
        assert!(first.is_some());
        let second = store.try_consume_token(token.id, now);
        assert!(second.is_none());
    }

    #[test]
    fn concurrent_consumption_has_exactly_one_winner() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()).unwrap());
        let now = Utc::now();
        let token = store.insert_approval_token(sample_token(now)).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = token.id;
                thread::spawn(move || store.try_consume_token(id, now).is_some())
            })
            .collect();

        let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn list_rules_includes_disabled_but_list_enabled_does_not() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let workspace_id = Uuid::new_v4();
        let now = Utc::now();

        let enabled = store.insert_rule(sample_rule(workspace_id, now)).unwrap();
        let mut disabled = sample_rule(workspace_id, now);
        disabled.enabled = false;
        let disabled = store.insert_rule(disabled).unwrap();

        assert_eq!(store.list_enabled_rules(workspace_id).len(), 1);
        assert_eq!(store.list_rules(workspace_id).len(), 2);
        assert_eq!(store.get_rule(enabled.id).unwrap().id, enabled.id);
        assert_eq!(store.get_rule(disabled.id).unwrap().id, disabled.id);
    }

    #[test]
    fn token_lookup_by_approval_request_id() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let now = Utc::now();
        let token = store.insert_approval_token(sample_token(now)).unwrap();

        let found = store.find_token_by_approval_request_id(token.approval_request_id).unwrap();
        assert_eq!(found.id, token.id);
        assert!(store.find_token_by_approval_request_id(Uuid::new_v4()).is_none());
    }

    #[test]
    fn raw_token_is_cleared_after_first_retrieval() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let now = Utc::now();
        let token = store.insert_approval_token(sample_token(now)).unwrap();

        let first = store.take_raw_token_once(token.id, now);
        assert_eq!(first.as_deref(), Some("raw"));
        let second = store.take_raw_token_once(token.id, now);
        assert_eq!(second, None);
    }

    #[test]
    fn store_reloads_from_disk() {
        let dir = tempdir().unwrap();
        let workspace_id = Uuid::new_v4();
        let now = Utc::now();
        {
            let store = Store::new(dir.path()).unwrap();
            store.insert_rule(sample_rule(workspace_id, now)).unwrap();
        }
        let reloaded = Store::new(dir.path()).unwrap();
        assert_eq!(reloaded.list_enabled_rules(workspace_id).len(), 1);
    }

    #[test]
    fn approval_transitions_out_of_pending_are_rejected() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let now = Utc::now();
        let approval = ApprovalRequest {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            agent_id: None,
            request_id: Uuid::new_v4(),
            status: ApprovalStatus::Pending,
            expires_at: now + Duration::hours(24),
            approver: None,
            denier: None,
            notifier_message: None,
            created_at: now,
        };
        let approval = store.insert_approval_request(approval).unwrap();
        let actor = Actor {
            identity: "alice".into(),
            at: now,
        };
        let resolved = store
            .resolve_approval_request(approval.id, ApprovalStatus::Approved, actor.clone(), now)
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);

        let second = store.resolve_approval_request(approval.id, ApprovalStatus::Denied, actor, now);
        assert!(second.is_err());
    }
}
