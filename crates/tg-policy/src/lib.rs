//! Combines rules, leases, and smart rules into a single allow/deny/
//! approval-required decision.
//!
//! Smart rules take precedence over pattern rules entirely: if any smart
//! rule matches, the most recently created match wins outright and pattern
//! rules and leases are never consulted. Otherwise pattern rules and leases
//! compete on a shared specificity ordering.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tg_domain::model::{ActionClass, Decision, DomainMatchType, Effect, PolicyLease, PolicyRule, ResourceMeta, RiskFlags};
use tg_store::Store;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tg_smart_rule::SmartRuleEvaluator;

#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub workspace_id: Uuid,
    pub tool_name: String,
    pub upstream_id: Uuid,
    pub action_class: ActionClass,
    pub resource: ResourceMeta,
    pub risk_flags: RiskFlags,
    pub args_redacted: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub decision: Decision,
    pub reason: String,
    pub matched_id: Option<Uuid>,
}

pub struct Evaluator {
    store: Arc<Store>,
    smart_rule: Arc<SmartRuleEvaluator>,
}

impl Evaluator {
    pub fn new(store: Arc<Store>, smart_rule: Arc<SmartRuleEvaluator>) -> Self {
        Self { store, smart_rule }
    }

    pub async fn evaluate(&self, ctx: &PolicyContext, cancel: &CancellationToken) -> EvaluationOutcome {
        let rules = self.store.list_enabled_rules(ctx.workspace_id);
        let leases = self.store.list_active_leases(ctx.workspace_id, Utc::now());

        let (smart_rules, pattern_rules): (Vec<PolicyRule>, Vec<PolicyRule>) =
            rules.into_iter().partition(|r| r.is_smart());

        if let Some(outcome) = self.evaluate_smart_rules(&smart_rules, ctx, cancel).await {
            return outcome;
        }

        self.evaluate_pattern_rules_and_leases(&pattern_rules, &leases, ctx)
    }

    async fn evaluate_smart_rules(&self, smart_rules: &[PolicyRule], ctx: &PolicyContext, cancel: &CancellationToken) -> Option<EvaluationOutcome> {
        let candidates: Vec<&PolicyRule> = smart_rules.iter().filter(|r| cheap_scope_matches(r, ctx)).collect();
        if candidates.is_empty() {
            return None;
        }

        let evaluations = futures_util::future::join_all(candidates.iter().map(|rule| {
            let condition = rule.smart_condition.clone().unwrap_or_default();
            let tool_name = ctx.tool_name.clone();
            let args = ctx.args_redacted.clone();
            async move {
                let verdict = self.smart_rule.evaluate(&tool_name, &args, &condition, cancel).await;
                (verdict, rule.created_at, rule.id, rule.effect)
            }
        }))
        .await;

        let mut matched: Vec<_> = evaluations.into_iter().filter(|(v, ..)| v.matches).collect();
        matched.sort_by_key(|(_, created_at, ..)| std::cmp::Reverse(*created_at));

        matched.into_iter().next().map(|(verdict, _, rule_id, effect)| EvaluationOutcome {
            decision: effect_to_decision(effect),
            reason: format!("smart rule matched: {}", verdict.reason),
            matched_id: Some(rule_id),
        })
    }

    fn evaluate_pattern_rules_and_leases(&self, rules: &[PolicyRule], leases: &[PolicyLease], ctx: &PolicyContext) -> EvaluationOutcome {
        let mut candidates: Vec<Candidate> = Vec::new();

        for rule in rules {
            if rule_matches(rule, ctx) {
                candidates.push(Candidate {
                    specificity: rule_specificity(rule),
                    created_at: rule.created_at,
                    kind: CandidateKind::Rule(rule),
                });
            }
        }
        for lease in leases {
            if lease_matches(lease, ctx) {
                candidates.push(Candidate {
                    specificity: lease_specificity(lease),
                    created_at: lease.created_at,
                    kind: CandidateKind::Lease(lease),
                });
            }
        }

        candidates.sort_by(|a, b| b.specificity.cmp(&a.specificity).then(b.created_at.cmp(&a.created_at)));

        match candidates.into_iter().next() {
            Some(Candidate { kind: CandidateKind::Lease(lease), .. }) => EvaluationOutcome {
                decision: Decision::Allowed,
                reason: "allowed by active lease".to_string(),
                matched_id: Some(lease.id),
            },
            Some(Candidate { kind: CandidateKind::Rule(rule), .. }) => EvaluationOutcome {
                decision: effect_to_decision(rule.effect),
                reason: rule
                    .name
                    .clone()
                    .map(|name| format!("matched rule '{name}'"))
                    .unwrap_or_else(|| "matched rule".to_string()),
                matched_id: Some(rule.id),
            },
            None => EvaluationOutcome {
                decision: Decision::Allowed,
                reason: "Default allow".to_string(),
                matched_id: None,
            },
        }
    }
}

enum CandidateKind<'a> {
    Rule(&'a PolicyRule),
    Lease(&'a PolicyLease),
}

struct Candidate<'a> {
    specificity: (u8, u8, u8, u8, u8),
    created_at: chrono::DateTime<Utc>,
    kind: CandidateKind<'a>,
}

fn effect_to_decision(effect: Effect) -> Decision {
    match effect {
        Effect::Allow => Decision::Allowed,
        Effect::Deny => Decision::Denied,
        Effect::RequireApproval => Decision::ApprovalRequired,
    }
}

fn cheap_scope_matches(rule: &PolicyRule, ctx: &PolicyContext) -> bool {
    if let Some(upstream_id) = rule.scope.upstream_id {
        if upstream_id != ctx.upstream_id {
            return false;
        }
    }
    if let Some(tool_name) = &rule.scope.tool_name {
        if !tool_name.eq_ignore_ascii_case(&ctx.tool_name) {
            return false;
        }
    }
    true
}

fn rule_matches(rule: &PolicyRule, ctx: &PolicyContext) -> bool {
    if rule.action_class != ActionClass::Any && rule.action_class != ctx.action_class {
        return false;
    }
    if let Some(upstream_id) = rule.scope.upstream_id {
        if upstream_id != ctx.upstream_id {
            return false;
        }
    }
    if let Some(tool_name) = &rule.scope.tool_name {
        if !tool_name.eq_ignore_ascii_case(&ctx.tool_name) {
            return false;
        }
    }
    if let Some(recipient) = &rule.scope.recipient {
        match &ctx.resource.recipient {
            Some(ctx_recipient) if recipient.eq_ignore_ascii_case(ctx_recipient) => {}
            _ => return false,
        }
    }
    if let Some(domain_filter) = &rule.scope.domain {
        let ctx_domain = ctx.resource.domain.as_deref().or(ctx.resource.url_host.as_deref());
        match ctx_domain {
            Some(domain) if domain_matches(domain_filter.pattern.as_str(), domain_filter.match_type, domain) => {}
            _ => return false,
        }
    }
    true
}

fn lease_matches(lease: &PolicyLease, ctx: &PolicyContext) -> bool {
    if lease.action_class != ctx.action_class {
        return false;
    }
    if let Some(upstream_id) = lease.scope.upstream_id {
        if upstream_id != ctx.upstream_id {
            return false;
        }
    }
    if let Some(tool_name) = &lease.scope.tool_name {
        if !tool_name.eq_ignore_ascii_case(&ctx.tool_name) {
            return false;
        }
    }
    if let Some(recipient) = &lease.scope.recipient {
        match &ctx.resource.recipient {
            Some(ctx_recipient) if recipient.eq_ignore_ascii_case(ctx_recipient) => {}
            _ => return false,
        }
    }
    if let Some(domain_filter) = &lease.scope.domain {
        let ctx_domain = ctx.resource.domain.as_deref().or(ctx.resource.url_host.as_deref());
        match ctx_domain {
            Some(domain) if domain_matches(domain_filter.pattern.as_str(), domain_filter.match_type, domain) => {}
            _ => return false,
        }
    }
    true
}

fn domain_matches(pattern: &str, match_type: DomainMatchType, domain: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let domain = domain.to_lowercase();
    match match_type {
        DomainMatchType::Exact => pattern == domain,
        DomainMatchType::Suffix => domain == pattern || domain.ends_with(&format!(".{pattern}")),
    }
}

/// `(tool_name, upstream_id, recipient, domain, action_class≠any)`, each 1
/// if that scope filter is set on the rule, else 0.
fn rule_specificity(rule: &PolicyRule) -> (u8, u8, u8, u8, u8) {
    (
        rule.scope.tool_name.is_some() as u8,
        rule.scope.upstream_id.is_some() as u8,
        rule.scope.recipient.is_some() as u8,
        rule.scope.domain.is_some() as u8,
        (rule.action_class != ActionClass::Any) as u8,
    )
}

/// Leases always constrain action-class, so that component is always 1.
fn lease_specificity(lease: &PolicyLease) -> (u8, u8, u8, u8, u8) {
    (
        lease.scope.tool_name.is_some() as u8,
        lease.scope.upstream_id.is_some() as u8,
        lease.scope.recipient.is_some() as u8,
        lease.scope.domain.is_some() as u8,
        1,
    )
}
