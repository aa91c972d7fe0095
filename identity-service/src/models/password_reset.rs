//! Password reset token model.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::sha256_hex;

/// Password reset row. Stores only the SHA-256 of the emailed token and
/// is tombstoned the moment it is used.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordResetToken {
    pub reset_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expiry_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl PasswordResetToken {
    pub fn new(user_id: Uuid, token: &str, ttl_minutes: i64) -> Self {
        let now = Utc::now();
        Self {
            reset_id: Uuid::new_v4(),
            user_id,
            token_hash: Self::hash_token(token),
            expiry_utc: now + Duration::minutes(ttl_minutes),
            deleted_utc: None,
            created_utc: now,
        }
    }

    pub fn hash_token(token: &str) -> String {
        sha256_hex(token)
    }

    pub fn is_valid(&self) -> bool {
        self.deleted_utc.is_none() && Utc::now() <= self.expiry_utc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_token_is_hashed_and_valid() {
        let reset = PasswordResetToken::new(Uuid::new_v4(), "tok", 60);
        assert_ne!(reset.token_hash, "tok");
        assert!(reset.is_valid());
    }

    #[test]
    fn test_consumed_reset_token_is_invalid() {
        let mut reset = PasswordResetToken::new(Uuid::new_v4(), "tok", 60);
        reset.deleted_utc = Some(Utc::now());
        assert!(!reset.is_valid());
    }
}
