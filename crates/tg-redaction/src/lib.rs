//! Recursive redaction of tool-call argument trees.
//!
//! Produces a tree safe to persist plus a flat map of safe extracts (URL
//! host/path, email domain, string length, array/object counts) a reviewer
//! can use without ever seeing the original values. The redactor never
//! fails — unexpected shapes are redacted conservatively rather than
//! rejected.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedactionError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

const SENSITIVE_KEYS: &[&str] = &[
    "credential",
    "credentials",
    "password",
    "passwd",
    "secret",
    "token",
    "apikey",
    "api_key",
    "body",
    "content",
    "rawcontent",
    "raw_content",
    "output",
    "stdout",
    "stderr",
    "blob",
    "attachment",
    "authorization",
    "cookie",
];

const MAX_ARRAY_LEN: usize = 10;
const ARRAY_SAMPLE: usize = 3;
const LONG_STRING_THRESHOLD: usize = 500;
const BASE64_LIKE_THRESHOLD: usize = 100;
const HIGH_ENTROPY_THRESHOLD: usize = 32;

/// Redacted tree plus a flat path → safe-extract map.
#[derive(Debug, Clone, Serialize)]
pub struct RedactionOutput {
    pub redacted: Value,
    pub metadata: Map<String, Value>,
}

pub fn redact(input: &Value) -> Result<RedactionOutput, RedactionError> {
    let mut metadata = Map::new();
    let redacted = redact_value(input, "$", &mut metadata, true);
    Ok(RedactionOutput { redacted, metadata })
}

fn redact_value(value: &Value, path: &str, metadata: &mut Map<String, Value>, top_level: bool) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, val) in map {
                if top_level && key == "approvalToken" {
                    continue;
                }
                let child_path = format!("{path}.{key}");
                if is_sensitive_key(key) {
                    record_shape_metadata(val, &child_path, metadata);
                    out.insert(key.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(key.clone(), redact_value(val, &child_path, metadata, false));
                }
            }
            metadata.insert(format!("{path}.__keys"), Value::Number(out.len().into()));
            Value::Object(out)
        }
        Value::Array(items) => {
            metadata.insert(format!("{path}.__count"), Value::Number(items.len().into()));
            if items.len() > MAX_ARRAY_LEN {
                let sampled: Vec<Value> = items
                    .iter()
                    .take(ARRAY_SAMPLE)
                    .enumerate()
                    .map(|(i, v)| redact_value(v, &format!("{path}[{i}]"), metadata, false))
                    .collect();
                Value::Array(sampled)
            } else {
                Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, v)| redact_value(v, &format!("{path}[{i}]"), metadata, false))
                        .collect(),
                )
            }
        }
        Value::String(s) => redact_string(s, path, metadata),
        other => other.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| {
        lower == *needle
            || lower.contains(needle)
            || lower.starts_with(&format!("{needle}_"))
            || lower.ends_with(&format!("_{needle}"))
    })
}

/// Never returns a string longer than `original` — a marker that would grow
/// the value (e.g. `[EMAIL:*@b.co]` for `a@b.co`) falls back to the original
/// instead, preserving spec.md's "never larger than its input" invariant.
fn bounded(marker: String, original: &str) -> Value {
    if marker.len() > original.len() {
        Value::String(original.to_string())
    } else {
        Value::String(marker)
    }
}

fn redact_string(s: &str, path: &str, metadata: &mut Map<String, Value>) -> Value {
    if let Some(domain) = email_domain(s) {
        metadata.insert(format!("{path}.email_domain"), Value::String(domain.clone()));
        return bounded(format!("[EMAIL:*@{domain}]"), s);
    }
    if let Some((host, url_path)) = url_parts(s) {
        metadata.insert(format!("{path}.url_host"), Value::String(host.clone()));
        metadata.insert(format!("{path}.url_path"), Value::String(url_path));
        return bounded(format!("[URL:{host}]"), s);
    }
    if is_heuristically_sensitive(s) {
        metadata.insert(format!("{path}.len"), Value::Number(s.chars().count().into()));
        return bounded(format!("[REDACTED:{} chars]", s.chars().count()), s);
    }
    Value::String(s.to_string())
}

fn is_heuristically_sensitive(s: &str) -> bool {
    let len = s.chars().count();
    if len > LONG_STRING_THRESHOLD {
        return true;
    }
    if len > BASE64_LIKE_THRESHOLD && is_base64_like(s) {
        return true;
    }
    if len >= HIGH_ENTROPY_THRESHOLD && is_high_entropy_alnum(s) {
        return true;
    }
    starts_with_html_tag(s)
}

fn is_base64_like(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
}

/// Crude Shannon-entropy-ish check: a long alphanumeric run with a wide
/// character-class spread (upper, lower, digit all present) is treated as
/// opaque token-like data rather than prose.
fn is_high_entropy_alnum(s: &str) -> bool {
    if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
        return false;
    }
    let has_upper = s.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = s.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = s.chars().any(|c| c.is_ascii_digit());
    has_upper && has_lower && has_digit
}

fn starts_with_html_tag(s: &str) -> bool {
    let trimmed = s.trim_start();
    trimmed.starts_with('<') && trimmed.len() > 1 && trimmed.as_bytes()[1].is_ascii_alphabetic()
}

fn email_domain(s: &str) -> Option<String> {
    let at = s.find('@')?;
    let local = &s[..at];
    let domain = &s[at + 1..];
    if local.is_empty() || domain.is_empty() || domain.contains(' ') || local.contains(' ') {
        return None;
    }
    if !domain.contains('.') {
        return None;
    }
    Some(domain.to_lowercase())
}

fn url_parts(s: &str) -> Option<(String, String)> {
    let rest = s.strip_prefix("https://").or_else(|| s.strip_prefix("http://"))?;
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], rest[idx..].to_string()),
        None => (rest, String::new()),
    };
    let host = authority.split(':').next().unwrap_or(authority);
    if host.is_empty() {
        return None;
    }
    Some((host.to_lowercase(), path))
}

fn record_shape_metadata(value: &Value, path: &str, metadata: &mut Map<String, Value>) {
    match value {
        Value::String(s) => {
            metadata.insert(format!("{path}.len"), Value::Number(s.chars().count().into()));
        }
        Value::Array(items) => {
            metadata.insert(format!("{path}.__count"), Value::Number(items.len().into()));
        }
        Value::Object(map) => {
            metadata.insert(format!("{path}.__keys"), Value::Number(map.len().into()));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn approval_token_is_dropped_not_redacted() {
        let input = json!({"approvalToken": "raw-token", "tool": "x"});
        let out = redact(&input).unwrap();
        assert!(out.redacted.get("approvalToken").is_none());
    }

    #[test]
    fn sensitive_key_variants_are_caught() {
        for key in ["password", "user_password", "password_confirm", "API_KEY", "x_secret"] {
            let input = json!({ key: "hunter2hunter2hunter2" });
            let out = redact(&input).unwrap();
            assert_eq!(out.redacted.get(key).unwrap(), &json!("[REDACTED]"), "key={key}");
        }
    }

    #[test]
    fn long_string_is_redacted_with_length() {
        let long = "a".repeat(600);
        let input = json!({"note": long});
        let out = redact(&input).unwrap();
        assert_eq!(out.redacted["note"], json!("[REDACTED:600 chars]"));
    }

    #[test]
    fn short_prose_string_passes_through() {
        let input = json!({"note": "please review this PR"});
        let out = redact(&input).unwrap();
        assert_eq!(out.redacted["note"], json!("please review this PR"));
    }

    #[test]
    fn url_is_replaced_with_host_only() {
        let input = json!({"link": "https://example.com/path/to/thing?x=1"});
        let out = redact(&input).unwrap();
        assert_eq!(out.redacted["link"], json!("[URL:example.com]"));
        assert_eq!(out.metadata["$.link.url_host"], json!("example.com"));
    }

    #[test]
    fn email_is_replaced_with_domain_only() {
        let input = json!({"to": "alice.wonderland@example.com"});
        let out = redact(&input).unwrap();
        assert_eq!(out.redacted["to"], json!("[EMAIL:*@example.com]"));
        assert_eq!(out.metadata["$.to.email_domain"], json!("example.com"));
    }

    #[test]
    fn short_email_falls_back_to_original_when_marker_would_grow_it() {
        let input = json!({"to": "a@b.co"});
        let out = redact(&input).unwrap();
        assert_eq!(out.redacted["to"], json!("a@b.co"));
    }

    #[test]
    fn oversized_array_is_sampled_down() {
        let items: Vec<i64> = (0..20).collect();
        let input = json!({"rows": items});
        let out = redact(&input).unwrap();
        assert_eq!(out.redacted["rows"].as_array().unwrap().len(), 3);
        assert_eq!(out.metadata["$.rows.__count"], json!(20));
    }

    #[test]
    fn small_array_is_preserved_in_full() {
        let input = json!({"rows": [1, 2, 3]});
        let out = redact(&input).unwrap();
        assert_eq!(out.redacted["rows"], json!([1, 2, 3]));
    }

    #[test]
    fn html_prefixed_string_is_redacted() {
        let input = json!({"markup": "<div>hello wonderful world</div>"});
        let out = redact(&input).unwrap();
        assert!(matches!(&out.redacted["markup"], Value::String(s) if s.starts_with("[REDACTED:")));
    }

    #[test]
    fn short_html_string_falls_back_to_original_when_marker_would_grow_it() {
        let input = json!({"markup": "<b>"});
        let out = redact(&input).unwrap();
        assert_eq!(out.redacted["markup"], json!("<b>"));
    }

    #[test]
    fn high_entropy_token_like_string_is_redacted() {
        let token = "aB3dE9fGhJ2kLmN4oPqR7sTuVwXyZ1aB";
        assert!(token.chars().count() >= 32);
        let input = json!({"ref": token});
        let out = redact(&input).unwrap();
        assert_ne!(out.redacted["ref"], json!(token));
    }

    #[test]
    fn output_is_never_larger_than_input() {
        let input = json!({
            "a": "short",
            "rows": (0..50).collect::<Vec<i64>>(),
            "nested": {"password": "x".repeat(20)},
        });
        let input_bytes = serde_json::to_vec(&input).unwrap().len();
        let out = redact(&input).unwrap();
        let output_bytes = serde_json::to_vec(&out.redacted).unwrap().len();
        assert!(output_bytes <= input_bytes);
    }
}
