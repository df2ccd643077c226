//! Agent authentication and workspace isolation.
//!
//! Verifies a raw client key against an agent's stored `client_key_hash`
//! without ever persisting the raw key, and enforces that every lookup is
//! scoped to a single workspace. Grounded on `sa_sessions::IdentityResolver`
//! for the resolver shape and on `gateway::api::auth::require_api_token`'s
//! constant-time comparison idiom.

use chrono::Utc;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use tg_domain::model::Agent;
use tg_domain::{Error, Result};
use tg_store::Store;

/// 256-bit hex digest of a raw client key, suitable for storage as
/// `Agent::client_key_hash`. Never reverse this — the raw key is not
/// recoverable and must never be persisted.
pub fn hash_client_key(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Resolves and authenticates agents within a single workspace.
pub struct IdentityResolver<'a> {
    store: &'a Store,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Authenticates `raw_key` against agents registered to `workspace_id`.
    ///
    /// Hashes the provided key and looks up the agent by `(workspace_id,
    /// client_key_hash)`, comparing hashes in constant time to avoid timing
    /// side channels on the digest comparison. Touches `last_seen_at` on
    /// success. Returns `Unauthorized` if no agent matches.
    pub fn authenticate(&self, workspace_id: Uuid, raw_key: &str) -> Result<Agent> {
        let provided_hash = hash_client_key(raw_key);
        let agent = self
            .store
            .find_agent_by_key_hash(workspace_id, &provided_hash)
            .filter(|agent| constant_time_eq(&agent.client_key_hash, &provided_hash))
            .ok_or_else(|| Error::Unauthorized("invalid or missing agent key".to_string()))?;

        self.store.touch_agent_last_seen(agent.id, Utc::now())?;
        Ok(Agent {
            last_seen_at: Utc::now(),
            ..agent
        })
    }
}

/// Enforces that a referenced entity's `workspace_id` matches the caller's
/// authenticated workspace. Any mismatch is a correctness bug upstream, not
/// a recoverable condition, so callers should treat this as `NotFound`
/// rather than leaking cross-workspace existence.
pub fn require_same_workspace(caller_workspace_id: Uuid, entity_workspace_id: Uuid) -> Result<()> {
    if caller_workspace_id != entity_workspace_id {
        return Err(Error::NotFound("entity not found in this workspace".to_string()));
    }
    Ok(())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn sample_agent(workspace_id: Uuid, key_hash: &str) -> Agent {
        let now = Utc::now() - Duration::hours(1);
        Agent {
            id: Uuid::new_v4(),
            workspace_id,
            name: "agent-1".into(),
            client_key_hash: key_hash.to_string(),
            last_seen_at: now,
            created_at: now,
        }
    }

    #[test]
    fn authenticates_matching_key_and_touches_last_seen() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let workspace_id = Uuid::new_v4();
        let raw_key = "sk-live-test-key";
        let hash = hash_client_key(raw_key);
        let original = store.insert_agent(sample_agent(workspace_id, &hash)).unwrap();

        let resolver = IdentityResolver::new(&store);
        let authenticated = resolver.authenticate(workspace_id, raw_key).unwrap();
        assert_eq!(authenticated.id, original.id);
        assert!(authenticated.last_seen_at > original.last_seen_at);
    }

    #[test]
    fn rejects_wrong_key() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let workspace_id = Uuid::new_v4();
        let hash = hash_client_key("correct-key");
        store.insert_agent(sample_agent(workspace_id, &hash)).unwrap();

        let resolver = IdentityResolver::new(&store);
        let result = resolver.authenticate(workspace_id, "wrong-key");
        assert!(matches!(result, Err(Error::Unauthorized(_))));
    }

    #[test]
    fn rejects_key_valid_in_a_different_workspace() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let workspace_a = Uuid::new_v4();
        let workspace_b = Uuid::new_v4();
        let raw_key = "shared-looking-key";
        let hash = hash_client_key(raw_key);
        store.insert_agent(sample_agent(workspace_a, &hash)).unwrap();

        let resolver = IdentityResolver::new(&store);
        let result = resolver.authenticate(workspace_b, raw_key);
        assert!(matches!(result, Err(Error::Unauthorized(_))));
    }

    #[test]
    fn require_same_workspace_rejects_mismatch() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(require_same_workspace(a, a).is_ok());
        assert!(require_same_workspace(a, b).is_err());
    }
}
