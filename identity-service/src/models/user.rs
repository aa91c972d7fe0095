//! User model - platform-wide user accounts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// User entity. Tenancy is attached through memberships, not the row itself.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub is_verified: bool,
    pub is_active: bool,
    /// Email-OTP second factor requested for this account.
    pub mfa_email_enabled: bool,
    /// Mirrors "has an active and verified authenticator app".
    pub mfa_totp_enabled: bool,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub deleted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Create a new user.
    pub fn new(email: String, password_hash: String, display_name: Option<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email,
            display_name,
            password_hash,
            is_verified: false,
            is_active: true,
            mfa_email_enabled: false,
            mfa_totp_enabled: false,
            last_login_utc: None,
            deleted_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Placeholder account created when someone is invited before they have
    /// ever signed in. Unverified until the invitation is accepted; the
    /// password hash is derived from discarded random bytes so it can never
    /// match a login attempt.
    pub fn placeholder(email: String, password_hash: String) -> Self {
        Self {
            is_verified: false,
            is_active: true,
            mfa_email_enabled: true,
            ..Self::new(email, password_hash, None)
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }

    /// Convert to sanitized response (no sensitive fields).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self.clone())
    }
}

/// User response for API (without sensitive fields).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub is_verified: bool,
    pub is_active: bool,
    pub mfa_email_enabled: bool,
    pub mfa_totp_enabled: bool,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            user_id: u.user_id,
            email: u.email,
            display_name: u.display_name,
            is_verified: u.is_verified,
            is_active: u.is_active,
            mfa_email_enabled: u.mfa_email_enabled,
            mfa_totp_enabled: u.mfa_totp_enabled,
            last_login_utc: u.last_login_utc,
            created_utc: u.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_defaults() {
        let user = User::new("a@x.com".to_string(), "$argon2…".to_string(), None);
        assert!(user.is_active);
        assert!(!user.is_verified);
        assert!(!user.mfa_email_enabled);
        assert!(!user.mfa_totp_enabled);
        assert!(!user.is_deleted());
    }

    #[test]
    fn test_placeholder_user_requires_otp() {
        let user = User::placeholder("invitee@x.com".to_string(), "$argon2…".to_string());
        assert!(!user.is_verified);
        assert!(user.is_active);
        assert!(user.mfa_email_enabled);
    }

    #[test]
    fn test_sanitized_has_no_password_hash() {
        let user = User::new("a@x.com".to_string(), "$argon2…".to_string(), None);
        let json = serde_json::to_value(user.sanitized()).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("password_hash").is_none());
    }
}
