use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::services::AccessTokenClaims;

/// Process-local cache of successfully verified access tokens.
///
/// Entries freeze the claims as they were at issuance; a lookup re-checks
/// the embedded expiry and evicts lazily, so a hit never outlives the
/// token itself. Instance-local by construction: deployments running
/// several replicas see independently warmed caches.
#[derive(Clone, Default)]
pub struct TokenCache {
    entries: Arc<DashMap<String, CachedToken>>,
}

#[derive(Clone)]
struct CachedToken {
    claims: AccessTokenClaims,
    exp: i64,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a token. A stale hit is evicted and reported as a miss,
    /// falling through to full signature verification.
    pub fn get(&self, token: &str) -> Option<AccessTokenClaims> {
        let now = Utc::now().timestamp();
        match self.entries.get(token) {
            Some(entry) if entry.exp > now => Some(entry.claims.clone()),
            Some(_) => {
                drop(self.entries.remove(token));
                None
            }
            None => None,
        }
    }

    /// Cache a token after successful verification. Last writer wins.
    pub fn insert(&self, token: &str, claims: AccessTokenClaims) {
        let exp = claims.exp;
        self.entries
            .insert(token.to_string(), CachedToken { claims, exp });
    }

    /// Drop every cached token belonging to a user (logout, password
    /// change).
    pub fn evict_user(&self, user_id: Uuid) {
        self.entries.retain(|_, entry| entry.claims.sub != user_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(user_id: Uuid, exp: i64) -> AccessTokenClaims {
        AccessTokenClaims {
            sub: user_id,
            name: None,
            email: "a@x.com".to_string(),
            role: "accountant".to_string(),
            permissions: vec![],
            tenant_id: Uuid::new_v4(),
            iat: 0,
            exp,
        }
    }

    #[test]
    fn test_hit_returns_cached_claims() {
        let cache = TokenCache::new();
        let user_id = Uuid::new_v4();
        cache.insert("tok", claims(user_id, Utc::now().timestamp() + 60));

        let hit = cache.get("tok").expect("should hit");
        assert_eq!(hit.sub, user_id);
    }

    #[test]
    fn test_expired_entry_is_evicted_on_lookup() {
        let cache = TokenCache::new();
        cache.insert("tok", claims(Uuid::new_v4(), Utc::now().timestamp() - 1));

        assert!(cache.get("tok").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_user_drops_only_their_tokens() {
        let cache = TokenCache::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let exp = Utc::now().timestamp() + 60;
        cache.insert("tok_a1", claims(alice, exp));
        cache.insert("tok_a2", claims(alice, exp));
        cache.insert("tok_b", claims(bob, exp));

        cache.evict_user(alice);

        assert!(cache.get("tok_a1").is_none());
        assert!(cache.get("tok_a2").is_none());
        assert!(cache.get("tok_b").is_some());
        assert_eq!(cache.len(), 1);
    }
}
