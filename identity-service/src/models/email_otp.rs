//! Email OTP model - ephemeral 6-digit second-factor codes.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::sha256_hex;

/// Email OTP row. The code itself is never stored, only its SHA-256.
/// At most one live row per user; issuing a new code tombstones prior
/// rows, and a successful verification tombstones the matched row.
#[derive(Debug, Clone, FromRow)]
pub struct EmailOtp {
    pub otp_id: Uuid,
    pub user_id: Uuid,
    pub code_hash: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expiry_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl EmailOtp {
    pub fn new(
        user_id: Uuid,
        code: &str,
        ttl_minutes: i64,
        user_agent: Option<String>,
        ip_address: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            otp_id: Uuid::new_v4(),
            user_id,
            code_hash: Self::hash_code(code),
            user_agent,
            ip_address,
            expiry_utc: now + Duration::minutes(ttl_minutes),
            deleted_utc: None,
            created_utc: now,
        }
    }

    pub fn hash_code(code: &str) -> String {
        sha256_hex(code)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiry_utc
    }

    pub fn is_valid(&self) -> bool {
        self.deleted_utc.is_none() && !self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_is_stored_hashed() {
        let otp = EmailOtp::new(Uuid::new_v4(), "493021", 5, None, None);
        assert_ne!(otp.code_hash, "493021");
        assert_eq!(otp.code_hash, EmailOtp::hash_code("493021"));
        assert!(otp.is_valid());
    }

    #[test]
    fn test_expired_code_is_invalid() {
        let mut otp = EmailOtp::new(Uuid::new_v4(), "493021", 5, None, None);
        otp.expiry_utc = Utc::now() - Duration::seconds(1);
        assert!(!otp.is_valid());
    }
}
