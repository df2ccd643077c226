//! Canonical hashing shared between the gateway and its client-side callers.
//!
//! Both sides must produce bit-identical digests from the same inputs — the
//! entire token-binding contract rests on that. Hashes are bare 256-bit hex
//! digests (no algorithm prefix), matching the bearer-token digest format
//! already used for agent-key verification.

use serde_json::Value;
use sha2::{Digest, Sha256};

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Recursively sort object keys and drop the top-level `approvalToken`
/// field. `null` is preserved; `serde_json::Value` has no `undefined`
/// variant, so "dropping undefined" falls out of using `Value` at all.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn canonical_bytes(args: &Value) -> Vec<u8> {
    let mut stripped = args.clone();
    if let Value::Object(map) = &mut stripped {
        map.remove("approvalToken");
    }
    let sorted = canonicalize(&stripped);
    serde_json::to_vec(&sorted).expect("Value serialization is infallible")
}

/// Canonicalize the argument tree and return its 256-bit hex digest.
pub fn args_hash(args: &Value) -> String {
    sha256_hex(&canonical_bytes(args))
}

/// Hash `tool_name ":" upstream_id ":" args_hash`.
pub fn request_hash(tool_name: &str, upstream_id: &str, args_hash: &str) -> String {
    let joined = format!("{tool_name}:{upstream_id}:{args_hash}");
    sha256_hex(joined.as_bytes())
}

/// Digest of the raw approval token, used as its stored form.
pub fn hash_token(raw: &str) -> String {
    sha256_hex(raw.as_bytes())
}
