//! Refresh token model - one row per issued refresh token.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::sha256_hex;

/// Refresh token row. Only the SHA-256 of the signed token is stored; the
/// expiry is copied from the token's own `exp` claim so the row and the
/// signature always agree. Revocation is a tombstone, never a delete.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expiry_utc: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub deleted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl RefreshToken {
    /// Create a new refresh token row for a signed token string.
    pub fn new(
        user_id: Uuid,
        token: &str,
        expiry_utc: DateTime<Utc>,
        user_agent: Option<String>,
        ip_address: Option<String>,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            user_id,
            token_hash: Self::hash_token(token),
            expiry_utc,
            user_agent,
            ip_address,
            deleted_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Hash a token using SHA-256.
    pub fn hash_token(token: &str) -> String {
        sha256_hex(token)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiry_utc
    }

    /// Valid = not tombstoned and not past its expiry.
    pub fn is_valid(&self) -> bool {
        self.deleted_utc.is_none() && !self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_refresh_token_creation() {
        let expiry = Utc::now() + Duration::days(7);
        let token = RefreshToken::new(Uuid::new_v4(), "token_abc", expiry, None, None);

        assert_ne!(token.token_hash, "token_abc");
        assert_eq!(token.token_hash, RefreshToken::hash_token("token_abc"));
        assert!(token.is_valid());
    }

    #[test]
    fn test_refresh_token_expiry() {
        let expiry = Utc::now() - Duration::seconds(1);
        let token = RefreshToken::new(Uuid::new_v4(), "token_abc", expiry, None, None);

        assert!(token.is_expired());
        assert!(!token.is_valid());
    }

    #[test]
    fn test_refresh_token_revocation() {
        let expiry = Utc::now() + Duration::days(7);
        let mut token = RefreshToken::new(Uuid::new_v4(), "token_abc", expiry, None, None);
        assert!(token.is_valid());

        token.deleted_utc = Some(Utc::now());
        assert!(!token.is_valid());
    }
}
