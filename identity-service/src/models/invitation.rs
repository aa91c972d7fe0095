//! Invitation model - one-time tokens provisioning tenant members.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::sha256_hex;

/// Invitation row. The plaintext token exists only in the creation
/// response and the invitee's inbox; the row keeps its SHA-256.
/// Acceptance and revocation both tombstone the row; a resend replaces
/// the token hash in place.
#[derive(Debug, Clone, FromRow)]
pub struct UserInvitation {
    pub invitation_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role_id: Uuid,
    pub invited_by_user_id: Uuid,
    pub token_hash: String,
    pub expiry_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl UserInvitation {
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        role_id: Uuid,
        invited_by_user_id: Uuid,
        token: &str,
        expiry_hours: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            invitation_id: Uuid::new_v4(),
            user_id,
            tenant_id,
            role_id,
            invited_by_user_id,
            token_hash: Self::hash_token(token),
            expiry_utc: now + Duration::hours(expiry_hours),
            deleted_utc: None,
            created_utc: now,
        }
    }

    pub fn hash_token(token: &str) -> String {
        sha256_hex(token)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiry_utc
    }

    pub fn is_live(&self) -> bool {
        self.deleted_utc.is_none() && !self.is_expired()
    }
}

/// Invitation response for API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationResponse {
    pub invitation_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role_id: Uuid,
    pub expiry_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl From<UserInvitation> for InvitationResponse {
    fn from(i: UserInvitation) -> Self {
        Self {
            invitation_id: i.invitation_id,
            user_id: i.user_id,
            tenant_id: i.tenant_id,
            role_id: i.role_id,
            expiry_utc: i.expiry_utc,
            created_utc: i.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invitation(token: &str, expiry_hours: i64) -> UserInvitation {
        UserInvitation::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            token,
            expiry_hours,
        )
    }

    #[test]
    fn test_token_is_stored_hashed() {
        let inv = invitation("tok_plain", 168);
        assert_ne!(inv.token_hash, "tok_plain");
        assert_eq!(inv.token_hash, UserInvitation::hash_token("tok_plain"));
        assert!(inv.is_live());
    }

    #[test]
    fn test_tombstoned_invitation_is_not_live() {
        let mut inv = invitation("tok_plain", 168);
        inv.deleted_utc = Some(Utc::now());
        assert!(!inv.is_live());
    }

    #[test]
    fn test_expired_invitation_is_not_live() {
        let mut inv = invitation("tok_plain", 168);
        inv.expiry_utc = Utc::now() - Duration::seconds(1);
        assert!(inv.is_expired());
        assert!(!inv.is_live());
    }
}
