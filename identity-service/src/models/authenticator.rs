//! Authenticator model - TOTP secrets and backup codes.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// TOTP authenticator row. Stored inactive at setup time and only becomes
/// usable once the user proves possession of a valid code, which stamps
/// `verified_utc` and flips `is_active`. Backup codes are kept as a JSON
/// array and shrink in place as codes are consumed.
#[derive(Debug, Clone, FromRow)]
pub struct UserAuthenticator {
    pub authenticator_id: Uuid,
    pub user_id: Uuid,
    pub secret: String,
    pub backup_codes: String,
    pub is_active: bool,
    pub verified_utc: Option<DateTime<Utc>>,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub deleted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl UserAuthenticator {
    pub fn new(user_id: Uuid, secret: String, backup_codes: &[String]) -> Self {
        Self {
            authenticator_id: Uuid::new_v4(),
            user_id,
            secret,
            backup_codes: Self::encode_backup_codes(backup_codes),
            is_active: false,
            verified_utc: None,
            last_used_utc: None,
            deleted_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Usable for login = active, verified, and not tombstoned.
    pub fn is_usable(&self) -> bool {
        self.is_active && self.verified_utc.is_some() && self.deleted_utc.is_none()
    }

    pub fn encode_backup_codes(codes: &[String]) -> String {
        serde_json::to_string(codes).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn decode_backup_codes(&self) -> Vec<String> {
        serde_json::from_str(&self.backup_codes).unwrap_or_default()
    }

    /// Remove a backup code from the stored set, case-insensitively and
    /// ignoring surrounding whitespace. Returns the reduced set when the
    /// code matched, `None` when it did not.
    pub fn consume_backup_code(&self, presented: &str) -> Option<Vec<String>> {
        let normalized = presented.trim().to_lowercase();
        let codes = self.decode_backup_codes();
        let position = codes
            .iter()
            .position(|c| c.trim().to_lowercase() == normalized)?;

        let mut remaining = codes;
        remaining.remove(position);
        Some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator_with_codes(codes: &[&str]) -> UserAuthenticator {
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        UserAuthenticator::new(Uuid::new_v4(), "c2VjcmV0".to_string(), &codes)
    }

    #[test]
    fn test_new_authenticator_is_not_usable() {
        let auth = authenticator_with_codes(&["11111111"]);
        assert!(!auth.is_usable());
    }

    #[test]
    fn test_verified_and_active_is_usable() {
        let mut auth = authenticator_with_codes(&["11111111"]);
        auth.is_active = true;
        auth.verified_utc = Some(Utc::now());
        assert!(auth.is_usable());

        auth.deleted_utc = Some(Utc::now());
        assert!(!auth.is_usable());
    }

    #[test]
    fn test_consume_backup_code_is_single_use() {
        let mut auth = authenticator_with_codes(&["11111111", "22222222"]);

        let remaining = auth.consume_backup_code(" 11111111 ").expect("should match");
        assert_eq!(remaining, vec!["22222222".to_string()]);

        auth.backup_codes = UserAuthenticator::encode_backup_codes(&remaining);
        assert!(auth.consume_backup_code("11111111").is_none());
    }

    #[test]
    fn test_consume_backup_code_case_insensitive() {
        // Digit-only in practice, but matching is defined case-insensitively.
        let codes = vec!["AbCd1234".to_string()];
        let auth = UserAuthenticator::new(Uuid::new_v4(), "c2VjcmV0".to_string(), &codes);
        assert!(auth.consume_backup_code("abcd1234").is_some());
    }

    #[test]
    fn test_unknown_backup_code_fails() {
        let auth = authenticator_with_codes(&["11111111"]);
        assert!(auth.consume_backup_code("99999999").is_none());
    }
}
