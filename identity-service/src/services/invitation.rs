//! Invitation workflow: Created → Accepted | Revoked, with Resent as a
//! token-replacing transition.

use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Database;
use crate::models::invitation::InvitationResponse;
use crate::models::{User, UserInvitation};
use crate::services::{NotificationKind, NotificationPayload, NotificationSink};
use crate::utils::{generate_token, hash_password, unusable_password_hash, Password};

/// Read-only probe of an invitation token, used by the acceptance UI to
/// decide whether to ask for a password.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationProbe {
    pub email: String,
    pub tenant_label: String,
    pub role_name: String,
    /// New users must set a password on acceptance; existing verified
    /// users must not.
    pub requires_password: bool,
    pub expiry_utc: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone)]
pub struct InvitationService {
    db: Database,
    notifier: Arc<dyn NotificationSink>,
    expiry_hours: i64,
    public_url: String,
}

impl InvitationService {
    pub fn new(
        db: Database,
        notifier: Arc<dyn NotificationSink>,
        expiry_hours: i64,
        public_url: String,
    ) -> Self {
        Self {
            db,
            notifier,
            expiry_hours,
            public_url,
        }
    }

    // ==================== Create ====================

    /// Create an invitation. Validates tenant and role, guards against
    /// inviting existing members and duplicate live invitations, and
    /// creates a placeholder account for never-seen invitees. Returns
    /// the one-time plaintext token alongside the stored row.
    pub async fn create(
        &self,
        inviter_id: Uuid,
        invitee_email: &str,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> Result<(InvitationResponse, String), AppError> {
        let inviter = self
            .db
            .find_user_by_id(inviter_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| AppError::Forbidden(anyhow::anyhow!("Inviting user is not active")))?;

        let tenant = self
            .db
            .find_tenant_by_id(tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Tenant not found")))?;
        if !tenant.is_usable() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Tenant is not active"
            )));
        }

        let role = self
            .db
            .find_role_by_id(role_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Role not found")))?;
        if !role.is_usable() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Role is not active")));
        }
        // Privilege-escalation guard: the operator role can never be
        // handed out through an invitation.
        if role.is_superadmin() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "This role cannot be granted by invitation"
            )));
        }

        let existing_user = self.db.find_user_by_email(invitee_email).await?;

        if let Some(user) = &existing_user {
            if self.db.is_member(user.user_id, tenant_id).await? {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "User is already a member of this tenant"
                )));
            }
            if self
                .db
                .find_live_invitation(user.user_id, tenant_id)
                .await?
                .is_some()
            {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "An invitation for this user and tenant already exists"
                )));
            }
        }

        let (invitee_id, placeholder) = match &existing_user {
            Some(user) => (user.user_id, None),
            None => {
                let placeholder = User::placeholder(
                    invitee_email.to_string(),
                    unusable_password_hash()?.into_string(),
                );
                (placeholder.user_id, Some(placeholder))
            }
        };

        let token = generate_token();
        let invitation = UserInvitation::new(
            invitee_id,
            tenant_id,
            role_id,
            inviter.user_id,
            &token,
            self.expiry_hours,
        );

        let mut tx = self.db.begin().await?;
        if let Some(user) = &placeholder {
            self.db.insert_user_tx(&mut tx, user).await?;
        }
        self.db.insert_invitation_tx(&mut tx, &invitation).await?;
        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        self.dispatch_invitation(invitee_email, &tenant.label, &token);

        tracing::info!(
            target: "audit",
            event = "invitation_created",
            invitation_id = %invitation.invitation_id,
            tenant_id = %tenant_id,
            role = %role.name,
            "Invitation created"
        );

        Ok((invitation.into(), token))
    }

    // ==================== Verify ====================

    /// Read-only pre-acceptance probe.
    pub async fn verify(&self, token: &str) -> Result<InvitationProbe, AppError> {
        let (invitation, user) = self.lookup(token).await?;

        let tenant = self
            .db
            .find_tenant_by_id(invitation.tenant_id)
            .await?
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Invitation tenant missing")))?;
        let role = self
            .db
            .find_role_by_id(invitation.role_id)
            .await?
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Invitation role missing")))?;

        Ok(InvitationProbe {
            email: user.email,
            tenant_label: tenant.label,
            role_name: role.name,
            requires_password: !user.is_verified,
            expiry_utc: invitation.expiry_utc,
        })
    }

    // ==================== Accept ====================

    /// Accept an invitation. New users must supply a password, existing
    /// users must not. Password/verified patch, tenant membership
    /// (primary when it is the user's first), role assignment and
    /// invitation consumption commit as one transaction; partial
    /// application is never observable.
    pub async fn accept(
        &self,
        token: &str,
        password: Option<String>,
    ) -> Result<User, AppError> {
        let (invitation, user) = self.lookup(token).await?;

        let is_new_user = !user.is_verified;
        match (is_new_user, &password) {
            (true, None) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "A password is required to accept this invitation"
                )));
            }
            (false, Some(_)) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "A password must not be provided for an existing account"
                )));
            }
            _ => {}
        }

        let new_hash = match password {
            Some(password) => Some(hash_password(&Password::new(password))?),
            None => None,
        };

        let already_member = self.db.is_member(user.user_id, invitation.tenant_id).await?;
        let membership_count = self.db.count_memberships(user.user_id).await?;

        let mut tx = self.db.begin().await?;

        if let Some(hash) = &new_hash {
            self.db
                .update_user_password_tx(&mut tx, user.user_id, hash.as_str())
                .await?;
            self.db.set_user_verified_tx(&mut tx, user.user_id).await?;
        }

        if !already_member {
            let is_primary = membership_count == 0;
            self.db
                .insert_membership_tx(&mut tx, user.user_id, invitation.tenant_id, is_primary)
                .await?;
        }

        self.db
            .replace_user_roles_tx(&mut tx, user.user_id, invitation.tenant_id, invitation.role_id)
            .await?;

        self.db
            .consume_invitation_tx(&mut tx, invitation.invitation_id)
            .await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        if is_new_user {
            let notifier = self.notifier.clone();
            let payload = NotificationPayload {
                to: user.email.clone(),
                display_name: user.display_name.clone(),
                ..Default::default()
            };
            tokio::spawn(async move {
                notifier.notify(NotificationKind::Welcome, payload).await;
            });
        }

        tracing::info!(
            target: "audit",
            event = "invitation_accepted",
            invitation_id = %invitation.invitation_id,
            user_id = %user.user_id,
            tenant_id = %invitation.tenant_id,
            "Invitation accepted"
        );

        self.db
            .find_user_by_id(user.user_id)
            .await?
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("User vanished during accept")))
    }

    // ==================== Revoke ====================

    /// Revoke an invitation. Revoking twice is rejected; nothing needs
    /// undoing because grants only ever happen on acceptance.
    pub async fn revoke(&self, invitation_id: Uuid) -> Result<(), AppError> {
        let invitation = self
            .db
            .find_invitation_by_id(invitation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invitation not found")))?;

        if invitation.deleted_utc.is_some() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invitation is already revoked"
            )));
        }

        self.db.revoke_invitation(invitation_id).await?;

        tracing::info!(
            target: "audit",
            event = "invitation_revoked",
            invitation_id = %invitation_id,
            "Invitation revoked"
        );
        Ok(())
    }

    // ==================== Resend ====================

    /// Replace the token on a live invitation and re-dispatch it. The
    /// previous plaintext stops matching the moment the row updates.
    pub async fn resend(&self, invitation_id: Uuid) -> Result<InvitationResponse, AppError> {
        let invitation = self
            .db
            .find_invitation_by_id(invitation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invitation not found")))?;

        if invitation.deleted_utc.is_some() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invitation is no longer active"
            )));
        }

        let user = self
            .db
            .find_user_by_id(invitation.user_id)
            .await?
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Invitation user missing")))?;
        let tenant = self
            .db
            .find_tenant_by_id(invitation.tenant_id)
            .await?
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Invitation tenant missing")))?;

        let token = generate_token();
        let expiry_utc = chrono::Utc::now() + chrono::Duration::hours(self.expiry_hours);
        self.db
            .update_invitation_token(invitation_id, &UserInvitation::hash_token(&token), expiry_utc)
            .await?;

        self.dispatch_invitation(&user.email, &tenant.label, &token);

        tracing::info!(
            target: "audit",
            event = "invitation_resent",
            invitation_id = %invitation_id,
            "Invitation resent"
        );

        Ok(InvitationResponse {
            expiry_utc,
            ..InvitationResponse::from(invitation)
        })
    }

    // ==================== Internals ====================

    /// Resolve a presented token to its live invitation and invitee.
    async fn lookup(&self, token: &str) -> Result<(UserInvitation, User), AppError> {
        let invitation = self
            .db
            .find_invitation_by_token_hash(&UserInvitation::hash_token(token))
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Invitation not found or already used"))
            })?;

        if invitation.is_expired() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invitation has expired"
            )));
        }

        let user = self
            .db
            .find_user_by_id(invitation.user_id)
            .await?
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Invitation user missing")))?;

        Ok((invitation, user))
    }

    fn dispatch_invitation(&self, email: &str, tenant_label: &str, token: &str) {
        let link = format!("{}/invitations/{}", self.public_url, token);
        let notifier = self.notifier.clone();
        let payload = NotificationPayload {
            to: email.to_string(),
            tenant_label: Some(tenant_label.to_string()),
            token: Some(token.to_string()),
            link: Some(link),
            ..Default::default()
        };
        tokio::spawn(async move {
            notifier.notify(NotificationKind::Invitation, payload).await;
        });
    }
}
