//! Passkey model - WebAuthn credentials.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// WebAuthn credential row. `public_key` holds the serialized
/// `webauthn_rs::prelude::Passkey`; `sign_count` must never decrease
/// across successful assertions.
#[derive(Debug, Clone, FromRow)]
pub struct UserPasskey {
    pub passkey_id: Uuid,
    pub user_id: Uuid,
    /// Base64url credential id, unique across all users.
    pub credential_id: String,
    pub public_key: Vec<u8>,
    pub sign_count: i64,
    /// "platform" or "roaming".
    pub credential_type: String,
    pub transports: Option<String>,
    pub backup_eligible: bool,
    pub backup_state: bool,
    pub label: Option<String>,
    pub is_active: bool,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub deleted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl UserPasskey {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: Uuid,
        credential_id: String,
        public_key: Vec<u8>,
        sign_count: i64,
        credential_type: String,
        transports: Option<String>,
        backup_eligible: bool,
        backup_state: bool,
        label: Option<String>,
    ) -> Self {
        Self {
            passkey_id: Uuid::new_v4(),
            user_id,
            credential_id,
            public_key,
            sign_count,
            credential_type,
            transports,
            backup_eligible,
            backup_state,
            label,
            is_active: true,
            last_used_utc: None,
            deleted_utc: None,
            created_utc: Utc::now(),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.is_active && self.deleted_utc.is_none()
    }
}

/// Passkey response for API (no key material).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyResponse {
    pub passkey_id: Uuid,
    pub credential_type: String,
    pub label: Option<String>,
    pub backup_eligible: bool,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<UserPasskey> for PasskeyResponse {
    fn from(p: UserPasskey) -> Self {
        Self {
            passkey_id: p.passkey_id,
            credential_type: p.credential_type,
            label: p.label,
            backup_eligible: p.backup_eligible,
            last_used_utc: p.last_used_utc,
            created_utc: p.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_passkey_is_usable() {
        let passkey = UserPasskey::new(
            Uuid::new_v4(),
            "Y3JlZA".to_string(),
            vec![1, 2, 3],
            0,
            "platform".to_string(),
            None,
            false,
            false,
            None,
        );
        assert!(passkey.is_usable());
    }

    #[test]
    fn test_response_carries_no_key_material() {
        let passkey = UserPasskey::new(
            Uuid::new_v4(),
            "Y3JlZA".to_string(),
            vec![1, 2, 3],
            0,
            "roaming".to_string(),
            None,
            false,
            false,
            Some("YubiKey".to_string()),
        );
        let json = serde_json::to_value(PasskeyResponse::from(passkey)).unwrap();
        assert!(json.get("publicKey").is_none());
        assert!(json.get("credentialId").is_none());
    }
}
