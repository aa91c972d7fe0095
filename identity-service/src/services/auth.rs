//! Login, MFA verification, refresh, logout and password lifecycle.
//!
//! The session state machine: credentials are verified first; if a
//! second factor applies the flow pauses with an MFA-pending response
//! and resumes through the matching verify call; every path ends in the
//! same session-establishment tail.

use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{MembershipRow, PasswordResetToken, RefreshToken, User};
use crate::services::{
    AccessTokenPayload, AuthzService, EmailOtpService, JwtService, NotificationKind,
    NotificationPayload, NotificationSink, TokenCache, TotpService,
};
use crate::utils::{generate_token, hash_password, verify_password, Password, PasswordHashString};

/// Second factor selected at login time. TOTP outranks email OTP when
/// both are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaType {
    Totp,
    Email,
}

/// The session's user snapshot as returned to clients and frozen into
/// the access token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub role: String,
    pub permissions: Vec<String>,
    pub selected_tenant_id: Uuid,
    pub tenants: Vec<MembershipRow>,
}

/// Everything a successful authentication hands back to the HTTP layer.
#[derive(Debug)]
pub struct EstablishedSession {
    pub user: SessionUser,
    pub access_token: String,
    pub refresh_token: String,
}

/// Result of the first login step.
pub enum LoginOutcome {
    /// Credentials verified but a second factor is pending; no tokens
    /// are issued yet.
    MfaRequired { mfa_type: MfaType, email: String },
    Session(Box<EstablishedSession>),
}

/// Request metadata recorded against issued refresh tokens and OTPs.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Clone)]
pub struct AuthService {
    db: Database,
    jwt: JwtService,
    token_cache: TokenCache,
    authz: AuthzService,
    otp: EmailOtpService,
    totp: TotpService,
    notifier: Arc<dyn NotificationSink>,
    reset_ttl_minutes: i64,
    public_url: String,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        jwt: JwtService,
        token_cache: TokenCache,
        authz: AuthzService,
        otp: EmailOtpService,
        totp: TotpService,
        notifier: Arc<dyn NotificationSink>,
        reset_ttl_minutes: i64,
        public_url: String,
    ) -> Self {
        Self {
            db,
            jwt,
            token_cache,
            authz,
            otp,
            totp,
            notifier,
            reset_ttl_minutes,
            public_url,
        }
    }

    // ==================== Login ====================

    /// First login step: verify the password and either establish the
    /// session or pause for a second factor. Unknown emails and wrong
    /// passwords collapse into one generic rejection; only deactivation
    /// and unverified email are distinguishable.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        meta: ClientMeta,
    ) -> Result<LoginOutcome, AppError> {
        let user = self
            .db
            .find_user_by_email(email)
            .await?
            .ok_or_else(invalid_credentials)?;

        if !user.is_verified {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Email is not verified"
            )));
        }
        if !user.is_active {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Account is deactivated"
            )));
        }

        verify_password(
            &Password::new(password.to_string()),
            &PasswordHashString::new(user.password_hash.clone()),
        )
        .map_err(|_| invalid_credentials())?;

        // Second-factor priority: an active and verified authenticator
        // app outranks email OTP. An authenticator that was set up but
        // never verified does not count.
        if self
            .db
            .find_usable_authenticator(user.user_id)
            .await?
            .is_some()
        {
            return Ok(LoginOutcome::MfaRequired {
                mfa_type: MfaType::Totp,
                email: user.email,
            });
        }

        if user.mfa_email_enabled {
            self.otp
                .issue(&user, meta.user_agent.clone(), meta.ip_address.clone())
                .await?;
            return Ok(LoginOutcome::MfaRequired {
                mfa_type: MfaType::Email,
                email: user.email,
            });
        }

        let session = self.establish_session(&user, &meta).await?;
        Ok(LoginOutcome::Session(Box::new(session)))
    }

    /// Resume a login paused on the email OTP factor.
    pub async fn verify_email_otp(
        &self,
        email: &str,
        code: &str,
        meta: ClientMeta,
    ) -> Result<EstablishedSession, AppError> {
        // Same rejection whether the account is unknown or the code is
        // wrong.
        let user = self
            .db
            .find_user_by_email(email)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid or expired code")))?;

        self.otp.verify(user.user_id, code).await?;

        self.establish_session(&user, &meta).await
    }

    /// Resume a login paused on the TOTP factor, with either an
    /// authenticator code or a one-time backup code.
    pub async fn verify_totp(
        &self,
        email: &str,
        code: &str,
        is_backup_code: bool,
        meta: ClientMeta,
    ) -> Result<EstablishedSession, AppError> {
        let message = if is_backup_code {
            "Invalid backup code"
        } else {
            "Invalid TOTP code"
        };
        let user = self
            .db
            .find_user_by_email(email)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!(message)))?;

        if is_backup_code {
            self.totp.verify_backup_code(user.user_id, code).await?;
        } else {
            self.totp.validate_login_code(user.user_id, code).await?;
        }

        self.establish_session(&user, &meta).await
    }

    /// Shared session-establishment tail. Resolves authorization fresh,
    /// signs the pair, persists the refresh token, primes the token
    /// cache with the new access token and stamps the login time.
    pub async fn establish_session(
        &self,
        user: &User,
        meta: &ClientMeta,
    ) -> Result<EstablishedSession, AppError> {
        let ctx = self.authz.resolve(user.user_id).await?;

        let pair = self.jwt.issue_pair(AccessTokenPayload {
            user_id: user.user_id,
            name: user.display_name.clone(),
            email: user.email.clone(),
            role: ctx.role.clone(),
            permissions: ctx.permissions.clone(),
            tenant_id: ctx.tenant_id,
        })?;

        let refresh_row = RefreshToken::new(
            user.user_id,
            &pair.refresh_token,
            pair.refresh_expiry_utc,
            meta.user_agent.clone(),
            meta.ip_address.clone(),
        );
        self.db.insert_refresh_token(&refresh_row).await?;

        self.db.touch_user_login(user.user_id).await?;
        self.token_cache
            .insert(&pair.access_token, pair.access_claims.clone());

        tracing::info!(
            target: "audit",
            event = "session_established",
            user_id = %user.user_id,
            tenant_id = %ctx.tenant_id,
            ip = meta.ip_address.as_deref().unwrap_or("-"),
            "Session established"
        );

        Ok(EstablishedSession {
            user: SessionUser {
                user_id: user.user_id,
                email: user.email.clone(),
                display_name: user.display_name.clone(),
                role: ctx.role,
                permissions: ctx.permissions,
                selected_tenant_id: ctx.tenant_id,
                tenants: ctx.memberships,
            },
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
    }

    // ==================== Refresh ====================

    /// Rotate a refresh token. Authorization is re-resolved from the
    /// store, never from the old token's claims, so role and permission
    /// changes take effect here. The presented token is revoked in the
    /// same transaction that persists its replacement: once this call
    /// returns, the old token never validates again.
    pub async fn refresh(
        &self,
        presented: &str,
        meta: ClientMeta,
    ) -> Result<EstablishedSession, AppError> {
        let invalid = || AppError::Unauthorized(anyhow::anyhow!("Invalid token"));

        self.jwt.verify_refresh(presented).map_err(|_| invalid())?;

        let stored = self
            .db
            .find_valid_refresh_token(&RefreshToken::hash_token(presented))
            .await?
            .ok_or_else(invalid)?;

        let user = self
            .db
            .find_user_by_id(stored.user_id)
            .await?
            .filter(|u| u.is_active && u.is_verified)
            .ok_or_else(invalid)?;

        let ctx = self.authz.resolve(user.user_id).await?;

        let pair = self.jwt.issue_pair(AccessTokenPayload {
            user_id: user.user_id,
            name: user.display_name.clone(),
            email: user.email.clone(),
            role: ctx.role.clone(),
            permissions: ctx.permissions.clone(),
            tenant_id: ctx.tenant_id,
        })?;

        let replacement = RefreshToken::new(
            user.user_id,
            &pair.refresh_token,
            pair.refresh_expiry_utc,
            meta.user_agent.clone(),
            meta.ip_address.clone(),
        );

        let mut tx = self.db.begin().await?;
        self.db
            .revoke_refresh_token_tx(&mut tx, stored.token_id)
            .await?;
        self.db
            .insert_refresh_token_tx(&mut tx, &replacement)
            .await?;
        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        self.token_cache
            .insert(&pair.access_token, pair.access_claims.clone());

        tracing::info!(user_id = %user.user_id, "Refresh token rotated");

        Ok(EstablishedSession {
            user: SessionUser {
                user_id: user.user_id,
                email: user.email.clone(),
                display_name: user.display_name.clone(),
                role: ctx.role,
                permissions: ctx.permissions,
                selected_tenant_id: ctx.tenant_id,
                tenants: ctx.memberships,
            },
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
    }

    // ==================== Logout ====================

    /// Global logout: revoke every refresh token the user holds across
    /// devices and drop their cached access tokens.
    pub async fn logout(&self, user_id: Uuid) -> Result<(), AppError> {
        let revoked = self.db.revoke_all_refresh_tokens(user_id).await?;
        self.token_cache.evict_user(user_id);

        tracing::info!(
            target: "audit",
            event = "logout",
            user_id = %user_id,
            revoked_tokens = revoked,
            "User logged out"
        );
        Ok(())
    }

    // ==================== Password Lifecycle ====================

    /// Always succeeds from the caller's point of view: whether the
    /// email exists is never observable.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AppError> {
        let user = match self.db.find_user_by_email(email).await? {
            Some(user) if user.is_active => user,
            _ => {
                tracing::debug!("Password reset requested for unknown or inactive account");
                return Ok(());
            }
        };

        let token = generate_token();
        let reset = PasswordResetToken::new(user.user_id, &token, self.reset_ttl_minutes);
        self.db.insert_reset_token(&reset).await?;

        let link = format!("{}/auth/password/reset?token={}", self.public_url, token);
        let notifier = self.notifier.clone();
        let payload = NotificationPayload {
            to: user.email.clone(),
            display_name: user.display_name.clone(),
            token: Some(token),
            link: Some(link),
            ..Default::default()
        };
        tokio::spawn(async move {
            notifier
                .notify(NotificationKind::PasswordReset, payload)
                .await;
        });

        tracing::info!(user_id = %user.user_id, "Password reset requested");
        Ok(())
    }

    /// Redeem a reset token. The token is consumed and every refresh
    /// token the user holds is revoked in the same transaction, so a
    /// stolen session does not survive the reset.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AppError> {
        let reset = self
            .db
            .find_valid_reset_token(&PasswordResetToken::hash_token(token))
            .await?
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Invalid or expired reset token"))
            })?;

        let user = self
            .db
            .find_user_by_id(reset.user_id)
            .await?
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Invalid or expired reset token"))
            })?;

        let new_hash = hash_password(&Password::new(new_password.to_string()))?;

        let mut tx = self.db.begin().await?;
        self.db
            .update_user_password_tx(&mut tx, user.user_id, new_hash.as_str())
            .await?;
        self.db.consume_reset_token_tx(&mut tx, reset.reset_id).await?;
        self.db
            .revoke_all_refresh_tokens_tx(&mut tx, user.user_id)
            .await?;
        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        self.token_cache.evict_user(user.user_id);

        let notifier = self.notifier.clone();
        let payload = NotificationPayload {
            to: user.email.clone(),
            display_name: user.display_name.clone(),
            ..Default::default()
        };
        tokio::spawn(async move {
            notifier
                .notify(NotificationKind::PasswordResetSuccess, payload)
                .await;
        });

        tracing::info!(target: "audit", event = "password_reset", user_id = %user.user_id, "Password reset");
        Ok(())
    }

    /// Change the password of an authenticated user. Requires the
    /// current password and ends every other session.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        let user = self
            .db
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

        verify_password(
            &Password::new(current_password.to_string()),
            &PasswordHashString::new(user.password_hash.clone()),
        )
        .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Current password is incorrect")))?;

        let new_hash = hash_password(&Password::new(new_password.to_string()))?;

        let mut tx = self.db.begin().await?;
        self.db
            .update_user_password_tx(&mut tx, user_id, new_hash.as_str())
            .await?;
        self.db
            .revoke_all_refresh_tokens_tx(&mut tx, user_id)
            .await?;
        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        self.token_cache.evict_user(user_id);

        tracing::info!(target: "audit", event = "password_change", user_id = %user_id, "Password changed");
        Ok(())
    }

    /// Toggle the email-OTP second factor.
    pub async fn set_email_mfa(&self, user_id: Uuid, enabled: bool) -> Result<(), AppError> {
        self.db.set_user_email_mfa(user_id, enabled).await?;
        tracing::info!(user_id = %user_id, enabled, "Email MFA toggled");
        Ok(())
    }

    /// Fresh profile for the authenticated user, resolved from the
    /// store rather than from token claims.
    pub async fn profile(&self, user_id: Uuid) -> Result<SessionUser, AppError> {
        let user = self
            .db
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;
        let ctx = self.authz.resolve(user_id).await?;

        Ok(SessionUser {
            user_id: user.user_id,
            email: user.email,
            display_name: user.display_name,
            role: ctx.role,
            permissions: ctx.permissions,
            selected_tenant_id: ctx.tenant_id,
            tenants: ctx.memberships,
        })
    }
}

fn invalid_credentials() -> AppError {
    AppError::Unauthorized(anyhow::anyhow!("Invalid email or password"))
}
