//! Approval request state machine, single-use token issuance, and the
//! binding check that prevents argument tampering between approval and
//! redemption.
//!
//! Directly grounded on `gateway::runtime::approval::ApprovalStore`,
//! generalized from an in-process `oneshot`-channel rendezvous (no
//! persistence, no polling) to the spec's fully persisted, polling-driven,
//! multi-field-bound token model backed by `tg-store`. The single-use
//! semantics the teacher already encodes (remove-and-resolve under one
//! lock acquisition) is the same shape as the atomic CAS on `consumed_at`.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use uuid::Uuid;

use tg_domain::model::{Actor, ApprovalRequest, ApprovalStatus, ApprovalToken, Decision, Effect, PolicyLease, PolicyRule, Request, ScopeFilters};
use tg_domain::trace::TraceEvent;
use tg_domain::{Error, Result};
use tg_store::Store;

/// Why a token-retry was denied. Every variant is a policy *decision*, not
/// an infrastructure error — the authorize endpoint turns these into a
/// `denied` response with a human-readable reason, never a 5xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenDenialReason {
    Unknown,
    AlreadyUsed,
    Expired,
    BindingMismatch(&'static str),
}

impl TokenDenialReason {
    pub fn reason(&self) -> String {
        match self {
            TokenDenialReason::Unknown => "unknown or revoked approval token".to_string(),
            TokenDenialReason::AlreadyUsed => "token already used".to_string(),
            TokenDenialReason::Expired => "approval token expired".to_string(),
            TokenDenialReason::BindingMismatch(field) => format!("token binding mismatch on {field}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollResult {
    pub status: ApprovalStatus,
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Caller-supplied options for the optional lease created on approval.
#[derive(Debug, Clone)]
pub struct LeaseOptions {
    pub duration: Duration,
}

pub struct ApprovalManager<'a> {
    store: &'a Store,
    approval_ttl: Duration,
    token_ttl: Duration,
}

impl<'a> ApprovalManager<'a> {
    pub fn new(store: &'a Store, approval_ttl: Duration, token_ttl: Duration) -> Self {
        Self {
            store,
            approval_ttl,
            token_ttl,
        }
    }

    /// Creates a `pending` approval request bound to an already-written
    /// audit `Request` row.
    pub fn create(&self, request: &Request, agent_id: Option<Uuid>, now: DateTime<Utc>) -> Result<ApprovalRequest> {
        let approval = ApprovalRequest {
            id: Uuid::new_v4(),
            workspace_id: request.workspace_id,
            agent_id,
            request_id: request.id,
            status: ApprovalStatus::Pending,
            expires_at: now + self.approval_ttl,
            approver: None,
            denier: None,
            notifier_message: None,
            created_at: now,
        };
        let approval = self.store.insert_approval_request(approval)?;
        TraceEvent::ApprovalCreated {
            approval_request_id: approval.id,
            request_id: request.id,
            expires_at: approval.expires_at,
        }
        .emit();
        Ok(approval)
    }

    /// Approves a pending request, mints a single-use token bound to the
    /// underlying request's hashes, and optionally opens a lease with the
    /// same scope. Returns the raw token once — the caller must deliver it
    /// (directly, or via the polling interface) because only its hash is
    /// ever persisted again after this call returns.
    pub fn approve(
        &self,
        approval_id: Uuid,
        approver_identity: &str,
        now: DateTime<Utc>,
        lease: Option<LeaseOptions>,
    ) -> Result<(ApprovalRequest, String)> {
        let approval = self.store.resolve_approval_request(
            approval_id,
            ApprovalStatus::Approved,
            Actor {
                identity: approver_identity.to_string(),
                at: now,
            },
            now,
        )?;

        let request = self
            .store
            .get_request(approval.request_id)
            .ok_or_else(|| Error::NotFound(format!("audit request {}", approval.request_id)))?;

        let raw_token = generate_raw_token();
        let token = ApprovalToken {
            id: Uuid::new_v4(),
            approval_request_id: approval.id,
            token_hash: tg_hashing::hash_token(&raw_token),
            raw_token: Some(raw_token.clone()),
            request_hash: request.request_hash.clone(),
            tool_name: request.tool_name.clone(),
            upstream_id: request.upstream_id,
            args_hash: request.args_hash.clone(),
            expires_at: now + self.token_ttl,
            consumed_at: None,
            retrieved_at: None,
            created_at: now,
        };
        let token = self.store.insert_approval_token(token)?;
        TraceEvent::TokenIssued {
            approval_request_id: approval.id,
            token_id: token.id,
            expires_at: token.expires_at,
        }
        .emit();
        TraceEvent::ApprovalResolved {
            approval_request_id: approval.id,
            status: ApprovalStatus::Approved,
            actor: approver_identity.to_string(),
        }
        .emit();

        if let Some(opts) = lease {
            let lease = PolicyLease {
                id: Uuid::new_v4(),
                workspace_id: request.workspace_id,
                creator: approver_identity.to_string(),
                action_class: request.action_class,
                scope: scope_from_request(&request),
                created_at: now,
                expires_at: now + opts.duration,
            };
            self.store.insert_lease(lease)?;
        }

        Ok((approval, raw_token))
    }

    /// Denies a pending request and optionally inserts a standing deny rule
    /// scoped to the same tool/upstream/recipient/domain, at priority 100
    /// (highest).
    pub fn deny(&self, approval_id: Uuid, denier_identity: &str, now: DateTime<Utc>, create_deny_rule: bool) -> Result<ApprovalRequest> {
        let approval = self.store.resolve_approval_request(
            approval_id,
            ApprovalStatus::Denied,
            Actor {
                identity: denier_identity.to_string(),
                at: now,
            },
            now,
        )?;
        TraceEvent::ApprovalResolved {
            approval_request_id: approval.id,
            status: ApprovalStatus::Denied,
            actor: denier_identity.to_string(),
        }
        .emit();

        if create_deny_rule {
            let request = self
                .store
                .get_request(approval.request_id)
                .ok_or_else(|| Error::NotFound(format!("audit request {}", approval.request_id)))?;
            let rule = PolicyRule {
                id: Uuid::new_v4(),
                workspace_id: request.workspace_id,
                name: Some(format!("auto-deny: {}", request.tool_name)),
                priority: 100,
                enabled: true,
                effect: Effect::Deny,
                action_class: request.action_class,
                scope: scope_from_request(&request),
                smart_condition: None,
                created_at: now,
            };
            self.store.insert_rule(rule)?;
        }

        Ok(approval)
    }

    /// Polling interface: returns the read-time-effective status, and the
    /// raw token exactly once, on the first poll after approval.
    pub fn poll(&self, approval_id: Uuid, now: DateTime<Utc>) -> Result<PollResult> {
        let approval = self
            .store
            .get_approval_request(approval_id)
            .ok_or_else(|| Error::NotFound(format!("approval request {approval_id}")))?;
        let effective = approval.effective_status(now);

        if effective == ApprovalStatus::Expired && approval.status == ApprovalStatus::Pending {
            self.store.lazily_expire(approval_id, now);
            TraceEvent::ApprovalExpired {
                approval_request_id: approval_id,
            }
            .emit();
        }

        let (token, expires_at) = match effective {
            ApprovalStatus::Approved => match self.store.find_token_by_approval_request_id(approval_id) {
                Some(token) => {
                    let raw = self.store.take_raw_token_once(token.id, now);
                    if raw.is_some() {
                        TraceEvent::TokenRetrieved { token_id: token.id }.emit();
                    }
                    (raw, Some(token.expires_at))
                }
                None => (None, None),
            },
            _ => (None, None),
        };

        Ok(PollResult {
            status: effective,
            token,
            expires_at,
        })
    }

    /// Validates a retried authorize call's token and, on success,
    /// atomically consumes it. Binding fields are checked in a fixed order
    /// so the denial reason always names the first field that diverges.
    pub fn validate_and_consume(
        &self,
        raw_token: &str,
        tool_name: &str,
        upstream_id: Uuid,
        args_hash: &str,
        request_hash: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<ApprovalToken, TokenDenialReason> {
        let token_hash = tg_hashing::hash_token(raw_token);
        let token = self.store.find_token_by_hash(&token_hash).ok_or(TokenDenialReason::Unknown)?;

        if token.is_consumed() {
            return Err(TokenDenialReason::AlreadyUsed);
        }
        if token.is_expired(now) {
            return Err(TokenDenialReason::Expired);
        }
        if token.tool_name != tool_name {
            return Err(TokenDenialReason::BindingMismatch("tool_name"));
        }
        if token.upstream_id != upstream_id {
            return Err(TokenDenialReason::BindingMismatch("upstream_id"));
        }
        if token.args_hash != args_hash {
            return Err(TokenDenialReason::BindingMismatch("args_hash"));
        }
        if token.request_hash != request_hash {
            return Err(TokenDenialReason::BindingMismatch("request_hash"));
        }

        match self.store.try_consume_token(token.id, now) {
            Some(consumed) => {
                TraceEvent::TokenConsumed {
                    token_id: consumed.id,
                    tool_name: tool_name.to_string(),
                }
                .emit();
                Ok(consumed)
            }
            None => {
                TraceEvent::TokenConsumeRaced { token_id: token.id }.emit();
                Err(TokenDenialReason::AlreadyUsed)
            }
        }
    }
}

fn scope_from_request(request: &Request) -> ScopeFilters {
    ScopeFilters {
        upstream_id: Some(request.upstream_id),
        tool_name: Some(request.tool_name.clone()),
        domain: None,
        recipient: request.resource.recipient.clone(),
    }
}

fn generate_raw_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
