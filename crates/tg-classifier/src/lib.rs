//! Deterministic mapping from `(tool_name, args)` to action-class,
//! risk-level, risk-flags and resource metadata. Pure and stateless aside
//! from the compiled regex groups held by [`Classifier`] — no I/O.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tg_domain::model::{ActionClass, ResourceMeta, RiskFlags, RiskLevel};

const INTERNAL_SUFFIXES: &[&str] = &[".internal", ".local"];
const INTERNAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1"];

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyResult {
    pub action_class: ActionClass,
    pub risk_level: RiskLevel,
    pub risk_flags: RiskFlags,
    pub resource: ResourceMeta,
}

/// Holds the compiled, ordered action-class patterns. Construction can fail
/// only if the built-in pattern set itself fails to compile, which a test
/// below guards against.
pub struct Classifier {
    // Ordered most-restrictive first: transfer_value, execute, submit, send, write.
    // `read` has no pattern group — it is the default when nothing else matches.
    groups: Vec<(ActionClass, Regex)>,
}

impl Classifier {
    pub fn new() -> Result<Self, regex::Error> {
        let groups = vec![
            (
                ActionClass::TransferValue,
                Regex::new(r"(?i)\b(transfer|wire|pay|payment|withdraw|send[_ -]?money|disburse)\b")?,
            ),
            (
                ActionClass::Execute,
                Regex::new(r"(?i)\b(exec|execute|shell|run[_ -]?command|spawn|subprocess|eval)\b")?,
            ),
            (
                ActionClass::Submit,
                Regex::new(r"(?i)\b(submit|apply|checkout|purchase|order|book)\b")?,
            ),
            (
                ActionClass::Send,
                Regex::new(r"(?i)\b(send|email|mail|post|publish|notify|message|tweet)\b")?,
            ),
            (
                ActionClass::Write,
                Regex::new(
                    r"(?i)\b(write|create|update|edit|modify|delete|drop|destroy|remove|rm|patch)\b",
                )?,
            ),
        ];
        Ok(Self { groups })
    }

    pub fn classify(&self, tool_name: &str, args: &Value) -> ClassifyResult {
        let args_text = stringify(args);
        let action_class = self.classify_action(tool_name, &args_text);
        let resource = extract_resource(args);
        let risk_flags = self.compute_risk_flags(tool_name, &args_text, &resource);
        let risk_level = compute_risk_level(action_class, &risk_flags);
        ClassifyResult {
            action_class,
            risk_level,
            risk_flags,
            resource,
        }
    }

    /// Matches `tool_name` against every group, but only the `transfer_value`
    /// group also scans `args_text` — spec.md's ordered regex groups apply
    /// argument-text matching to transfer only, not to execute/submit/send/write.
    fn classify_action(&self, tool_name: &str, args_text: &str) -> ActionClass {
        for (class, pattern) in &self.groups {
            let matches_args = *class == ActionClass::TransferValue && pattern.is_match(args_text);
            if pattern.is_match(tool_name) || matches_args {
                return *class;
            }
        }
        ActionClass::Read
    }

    fn compute_risk_flags(&self, tool_name: &str, args_text: &str, resource: &ResourceMeta) -> RiskFlags {
        static SHELL_RE: OnceLock<Regex> = OnceLock::new();
        static DESTRUCTIVE_RE: OnceLock<Regex> = OnceLock::new();
        static ATTACHMENT_RE: OnceLock<Regex> = OnceLock::new();
        static FORM_RE: OnceLock<Regex> = OnceLock::new();

        let shell_re = SHELL_RE.get_or_init(|| Regex::new(r"(?i)\b(shell|exec|bash|sh -c|subprocess)\b").unwrap());
        let destructive_re =
            DESTRUCTIVE_RE.get_or_init(|| Regex::new(r"(?i)\b(delete|drop|destroy|rm -rf|truncate|purge)\b").unwrap());
        let attachment_re =
            ATTACHMENT_RE.get_or_init(|| Regex::new(r"(?i)\b(attachment|attach|upload|file_data)\b").unwrap());
        let form_re = FORM_RE.get_or_init(|| Regex::new(r"(?i)\b(form|checkout|submit)\b").unwrap());

        let combined = format!("{tool_name} {args_text}");
        RiskFlags {
            external_domain: resource
                .domain
                .as_deref()
                .or(resource.url_host.as_deref())
                .is_some_and(|d| !is_internal_host(d)),
            new_recipient: resource.recipient.is_some(),
            attachment: attachment_re.is_match(&combined),
            form_submit: form_re.is_match(&combined),
            shell_exec: shell_re.is_match(&combined),
            destructive: destructive_re.is_match(&combined),
        }
    }
}

fn is_internal_host(host: &str) -> bool {
    let lower = host.to_lowercase();
    if INTERNAL_HOSTS.contains(&lower.as_str()) {
        return true;
    }
    if INTERNAL_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
        return true;
    }
    is_rfc1918(&lower)
}

fn is_rfc1918(host: &str) -> bool {
    let octets: Vec<&str> = host.split('.').collect();
    if octets.len() != 4 {
        return false;
    }
    let parsed: Option<Vec<u8>> = octets.iter().map(|o| o.parse::<u8>().ok()).collect();
    let Some(parsed) = parsed else { return false };
    matches!(parsed[0], 10) || (parsed[0] == 172 && (16..=31).contains(&parsed[1])) || (parsed[0] == 192 && parsed[1] == 168)
}

fn compute_risk_level(action_class: ActionClass, flags: &RiskFlags) -> RiskLevel {
    let base = match action_class {
        ActionClass::TransferValue => RiskLevel::Critical,
        ActionClass::Execute => RiskLevel::High,
        ActionClass::Submit => {
            if flags.destructive {
                RiskLevel::High
            } else {
                RiskLevel::Med
            }
        }
        ActionClass::Send => {
            if flags.external_domain {
                RiskLevel::Med
            } else {
                RiskLevel::Low
            }
        }
        ActionClass::Write => {
            if flags.destructive {
                RiskLevel::Med
            } else {
                RiskLevel::Low
            }
        }
        ActionClass::Read | ActionClass::Any => RiskLevel::Low,
    };
    if base == RiskLevel::Low && flags.count() >= 3 {
        RiskLevel::Med
    } else {
        base
    }
}

fn extract_resource(args: &Value) -> ResourceMeta {
    let mut resource = ResourceMeta::default();
    walk_for_resource(args, &mut resource);
    resource
}

fn walk_for_resource(value: &Value, resource: &mut ResourceMeta) {
    match value {
        Value::String(s) => inspect_string(s, resource),
        Value::Object(map) => {
            for v in map.values() {
                walk_for_resource(v, resource);
            }
        }
        Value::Array(items) => {
            for v in items {
                walk_for_resource(v, resource);
            }
        }
        _ => {}
    }
}

fn inspect_string(s: &str, resource: &mut ResourceMeta) {
    if resource.recipient.is_none() {
        if let Some((local, domain)) = s.split_once('@') {
            if !local.is_empty() && domain.contains('.') && !domain.contains(' ') && !local.contains(' ') {
                resource.recipient = Some(s.to_string());
                resource.recipient_domain = Some(domain.to_lowercase());
                return;
            }
        }
    }
    if resource.url_host.is_none() {
        if let Some(rest) = s.strip_prefix("https://").or_else(|| s.strip_prefix("http://")) {
            let (authority, path) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, ""),
            };
            let host = authority.split(':').next().unwrap_or(authority).to_lowercase();
            if !host.is_empty() {
                resource.url_host = Some(host.clone());
                resource.url_path = Some(path.to_string());
                if resource.domain.is_none() {
                    resource.domain = Some(host);
                }
            }
        }
    }
}

fn stringify(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classifier() -> Classifier {
        Classifier::new().expect("built-in patterns compile")
    }

    #[test]
    fn transfer_value_takes_precedence_over_everything() {
        let result = classifier().classify("execute_payment", &json!({"note": "wire the funds"}));
        assert_eq!(result.action_class, ActionClass::TransferValue);
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn read_is_the_default_when_nothing_matches() {
        let result = classifier().classify("get_weather", &json!({"city": "nyc"}));
        assert_eq!(result.action_class, ActionClass::Read);
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn argument_text_only_influences_transfer_value_not_other_classes() {
        let result = classifier().classify("get_notes", &json!({"text": "remember to submit the report"}));
        assert_eq!(result.action_class, ActionClass::Read);
    }

    #[test]
    fn shell_exec_tool_is_high_risk() {
        let result = classifier().classify("run_shell_command", &json!({"cmd": "ls -la"}));
        assert_eq!(result.action_class, ActionClass::Execute);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert!(result.risk_flags.shell_exec);
    }

    #[test]
    fn send_to_external_domain_is_medium_risk() {
        let result = classifier().classify(
            "send_email",
            &json!({"to": "alice@external-corp.com", "body": "hi"}),
        );
        assert_eq!(result.action_class, ActionClass::Send);
        assert!(result.risk_flags.external_domain);
        assert!(result.risk_flags.new_recipient);
        assert_eq!(result.risk_level, RiskLevel::Med);
    }

    #[test]
    fn send_to_internal_domain_is_low_risk() {
        let result = classifier().classify(
            "send_email",
            &json!({"to": "ops@internal-corp.internal"}),
        );
        assert!(!result.risk_flags.external_domain);
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn destructive_write_is_medium_risk() {
        let result = classifier().classify("delete_record", &json!({"id": 1}));
        assert_eq!(result.action_class, ActionClass::Write);
        assert!(result.risk_flags.destructive);
        assert_eq!(result.risk_level, RiskLevel::Med);
    }

    #[test]
    fn three_or_more_flags_elevate_low_to_medium() {
        let result = classifier().classify(
            "read_attachment_form",
            &json!({"to": "new@external.com", "attachment": true, "form": true}),
        );
        assert!(result.risk_flags.count() >= 3);
        assert_eq!(result.risk_level, RiskLevel::Med);
    }

    #[test]
    fn url_host_is_extracted_and_internal_suffix_not_flagged_external() {
        let result = classifier().classify(
            "fetch_page",
            &json!({"url": "https://svc.internal/status"}),
        );
        assert_eq!(result.resource.url_host.as_deref(), Some("svc.internal"));
        assert!(!result.risk_flags.external_domain);
    }

    #[test]
    fn rfc1918_address_is_treated_as_internal() {
        assert!(is_internal_host("10.0.0.5"));
        assert!(is_internal_host("192.168.1.1"));
        assert!(is_internal_host("172.16.0.1"));
        assert!(!is_internal_host("172.32.0.1"));
        assert!(!is_internal_host("8.8.8.8"));
    }
}
