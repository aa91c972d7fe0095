//! PostgreSQL store for the identity service.
//!
//! Every security-sensitive row is tombstoned (`deleted_utc`), never
//! physically deleted, and every read applies the non-deleted filter.
//! Multi-row mutations that must be all-or-nothing take an explicit
//! transaction handle.

use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{
    EmailOtp, MembershipRow, PasswordResetToken, RefreshToken, Role, RoleGrantRow, Tenant, User,
    UserAuthenticator, UserInvitation, UserPasskey,
};

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");

    Ok(pool)
}

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction for multi-statement operations.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    // ==================== User Operations ====================

    /// Find user by email, case-insensitively.
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE LOWER(email) = LOWER($1) AND deleted_utc IS NULL",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find user by ID.
    pub async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1 AND deleted_utc IS NULL")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Insert a new user inside a transaction.
    pub async fn insert_user_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user: &User,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, display_name, password_hash, is_verified, is_active,
                               mfa_email_enabled, mfa_totp_enabled, last_login_utc, deleted_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.is_verified)
        .bind(user.is_active)
        .bind(user.mfa_email_enabled)
        .bind(user.mfa_totp_enabled)
        .bind(user.last_login_utc)
        .bind(user.deleted_utc)
        .bind(user.created_utc)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Update a user's password hash inside a transaction.
    pub async fn update_user_password_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET password_hash = $1 WHERE user_id = $2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Mark a user as verified inside a transaction.
    pub async fn set_user_verified_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET is_verified = TRUE WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Toggle the email-OTP second factor for a user.
    pub async fn set_user_email_mfa(&self, user_id: Uuid, enabled: bool) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET mfa_email_enabled = $1 WHERE user_id = $2")
            .bind(enabled)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Stamp last login time.
    pub async fn touch_user_login(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET last_login_utc = NOW() WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== Refresh Token Operations ====================

    /// Insert a refresh token row.
    pub async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_id, user_id, token_hash, expiry_utc, user_agent,
                                        ip_address, deleted_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(token.token_id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expiry_utc)
        .bind(&token.user_agent)
        .bind(&token.ip_address)
        .bind(token.deleted_utc)
        .bind(token.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Insert a refresh token row inside a transaction.
    pub async fn insert_refresh_token_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token: &RefreshToken,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_id, user_id, token_hash, expiry_utc, user_agent,
                                        ip_address, deleted_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(token.token_id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expiry_utc)
        .bind(&token.user_agent)
        .bind(&token.ip_address)
        .bind(token.deleted_utc)
        .bind(token.created_utc)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Find a live refresh token by its hash. Revoked and expired rows
    /// never match.
    pub async fn find_valid_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, AppError> {
        sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT * FROM refresh_tokens
            WHERE token_hash = $1 AND deleted_utc IS NULL AND expiry_utc > NOW()
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Revoke one refresh token inside a transaction (rotation).
    pub async fn revoke_refresh_token_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE refresh_tokens SET deleted_utc = NOW() WHERE token_id = $1 AND deleted_utc IS NULL",
        )
        .bind(token_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Revoke every live refresh token for a user (global logout).
    pub async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET deleted_utc = NOW() WHERE user_id = $1 AND deleted_utc IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected())
    }

    /// Revoke every live refresh token for a user inside a transaction.
    pub async fn revoke_all_refresh_tokens_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE refresh_tokens SET deleted_utc = NOW() WHERE user_id = $1 AND deleted_utc IS NULL",
        )
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== Email OTP Operations ====================

    /// Insert a fresh OTP, tombstoning any prior live codes for the user
    /// in the same transaction so at most one code is ever live.
    pub async fn replace_user_otp(&self, otp: &EmailOtp) -> Result<(), AppError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            "UPDATE email_otps SET deleted_utc = NOW() WHERE user_id = $1 AND deleted_utc IS NULL",
        )
        .bind(otp.user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query(
            r#"
            INSERT INTO email_otps (otp_id, user_id, code_hash, user_agent, ip_address,
                                    expiry_utc, deleted_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(otp.otp_id)
        .bind(otp.user_id)
        .bind(&otp.code_hash)
        .bind(&otp.user_agent)
        .bind(&otp.ip_address)
        .bind(otp.expiry_utc)
        .bind(otp.deleted_utc)
        .bind(otp.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Find a live, unexpired OTP for the user matching the code hash.
    pub async fn find_valid_otp(
        &self,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<Option<EmailOtp>, AppError> {
        sqlx::query_as::<_, EmailOtp>(
            r#"
            SELECT * FROM email_otps
            WHERE user_id = $1 AND code_hash = $2 AND deleted_utc IS NULL AND expiry_utc > NOW()
            "#,
        )
        .bind(user_id)
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Consume an OTP (one-time use).
    pub async fn consume_otp(&self, otp_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE email_otps SET deleted_utc = NOW() WHERE otp_id = $1")
            .bind(otp_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== Authenticator Operations ====================

    /// Insert a new authenticator, tombstoning all prior rows for the
    /// user so only one setup is ever pending or usable.
    pub async fn replace_user_authenticator(
        &self,
        authenticator: &UserAuthenticator,
    ) -> Result<(), AppError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            "UPDATE user_authenticators SET deleted_utc = NOW() WHERE user_id = $1 AND deleted_utc IS NULL",
        )
        .bind(authenticator.user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query(
            r#"
            INSERT INTO user_authenticators (authenticator_id, user_id, secret, backup_codes,
                                             is_active, verified_utc, last_used_utc, deleted_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(authenticator.authenticator_id)
        .bind(authenticator.user_id)
        .bind(&authenticator.secret)
        .bind(&authenticator.backup_codes)
        .bind(authenticator.is_active)
        .bind(authenticator.verified_utc)
        .bind(authenticator.last_used_utc)
        .bind(authenticator.deleted_utc)
        .bind(authenticator.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Find the user's active and verified authenticator, if any.
    pub async fn find_usable_authenticator(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserAuthenticator>, AppError> {
        sqlx::query_as::<_, UserAuthenticator>(
            r#"
            SELECT * FROM user_authenticators
            WHERE user_id = $1 AND is_active = TRUE AND verified_utc IS NOT NULL AND deleted_utc IS NULL
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find the user's pending (set up but not yet verified) authenticator.
    pub async fn find_pending_authenticator(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserAuthenticator>, AppError> {
        sqlx::query_as::<_, UserAuthenticator>(
            r#"
            SELECT * FROM user_authenticators
            WHERE user_id = $1 AND verified_utc IS NULL AND deleted_utc IS NULL
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Activate a verified authenticator and mirror the flag onto the
    /// user row, atomically.
    pub async fn enable_authenticator(
        &self,
        authenticator_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            "UPDATE user_authenticators SET is_active = TRUE, verified_utc = NOW() WHERE authenticator_id = $1",
        )
        .bind(authenticator_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query("UPDATE users SET mfa_totp_enabled = TRUE WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Tombstone every authenticator for the user and clear the user's
    /// TOTP flag, atomically.
    pub async fn disable_user_authenticators(&self, user_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            "UPDATE user_authenticators SET deleted_utc = NOW(), is_active = FALSE WHERE user_id = $1 AND deleted_utc IS NULL",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query("UPDATE users SET mfa_totp_enabled = FALSE WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Persist a reduced backup-code set after one code is consumed.
    pub async fn update_backup_codes(
        &self,
        authenticator_id: Uuid,
        backup_codes: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE user_authenticators SET backup_codes = $1, last_used_utc = NOW() WHERE authenticator_id = $2",
        )
        .bind(backup_codes)
        .bind(authenticator_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Stamp last-used time on an authenticator.
    pub async fn touch_authenticator(&self, authenticator_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE user_authenticators SET last_used_utc = NOW() WHERE authenticator_id = $1")
            .bind(authenticator_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== Passkey Operations ====================

    /// Insert a new passkey credential.
    pub async fn insert_passkey(&self, passkey: &UserPasskey) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_passkeys (passkey_id, user_id, credential_id, public_key, sign_count,
                                       credential_type, transports, backup_eligible, backup_state,
                                       label, is_active, last_used_utc, deleted_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(passkey.passkey_id)
        .bind(passkey.user_id)
        .bind(&passkey.credential_id)
        .bind(&passkey.public_key)
        .bind(passkey.sign_count)
        .bind(&passkey.credential_type)
        .bind(&passkey.transports)
        .bind(passkey.backup_eligible)
        .bind(passkey.backup_state)
        .bind(&passkey.label)
        .bind(passkey.is_active)
        .bind(passkey.last_used_utc)
        .bind(passkey.deleted_utc)
        .bind(passkey.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Find an active passkey by its credential id.
    pub async fn find_passkey_by_credential_id(
        &self,
        credential_id: &str,
    ) -> Result<Option<UserPasskey>, AppError> {
        sqlx::query_as::<_, UserPasskey>(
            r#"
            SELECT * FROM user_passkeys
            WHERE credential_id = $1 AND is_active = TRUE AND deleted_utc IS NULL
            "#,
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find all active passkeys for a user.
    pub async fn find_active_passkeys(&self, user_id: Uuid) -> Result<Vec<UserPasskey>, AppError> {
        sqlx::query_as::<_, UserPasskey>(
            r#"
            SELECT * FROM user_passkeys
            WHERE user_id = $1 AND is_active = TRUE AND deleted_utc IS NULL
            ORDER BY created_utc ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Record a successful assertion: new counter and last-used stamp in
    /// one statement.
    pub async fn record_passkey_use(
        &self,
        passkey_id: Uuid,
        sign_count: i64,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE user_passkeys SET sign_count = $1, last_used_utc = NOW() WHERE passkey_id = $2",
        )
        .bind(sign_count)
        .bind(passkey_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Update backup eligibility/state reported by an assertion.
    pub async fn update_passkey_backup_state(
        &self,
        passkey_id: Uuid,
        backup_eligible: bool,
        backup_state: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE user_passkeys SET backup_eligible = $1, backup_state = $2 WHERE passkey_id = $3",
        )
        .bind(backup_eligible)
        .bind(backup_state)
        .bind(passkey_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Rename a passkey, scoped to its owner.
    pub async fn rename_passkey(
        &self,
        passkey_id: Uuid,
        user_id: Uuid,
        label: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE user_passkeys SET label = $1 WHERE passkey_id = $2 AND user_id = $3 AND deleted_utc IS NULL",
        )
        .bind(label)
        .bind(passkey_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected())
    }

    /// Soft-delete a passkey, scoped to its owner.
    pub async fn deactivate_passkey(
        &self,
        passkey_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE user_passkeys SET is_active = FALSE, deleted_utc = NOW() WHERE passkey_id = $1 AND user_id = $2 AND deleted_utc IS NULL",
        )
        .bind(passkey_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected())
    }

    // ==================== Tenant & Membership Operations ====================

    /// Find tenant by ID.
    pub async fn find_tenant_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        sqlx::query_as::<_, Tenant>(
            "SELECT * FROM tenants WHERE tenant_id = $1 AND deleted_utc IS NULL",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find tenant by schema name.
    pub async fn find_tenant_by_schema_name(
        &self,
        schema_name: &str,
    ) -> Result<Option<Tenant>, AppError> {
        sqlx::query_as::<_, Tenant>(
            "SELECT * FROM tenants WHERE schema_name = $1 AND deleted_utc IS NULL",
        )
        .bind(schema_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Insert a new tenant.
    pub async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, schema_name, label, is_active, deleted_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.schema_name)
        .bind(&tenant.label)
        .bind(tenant.is_active)
        .bind(tenant.deleted_utc)
        .bind(tenant.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Load the user's memberships joined with active tenants, primary
    /// first, then oldest membership first.
    pub async fn find_memberships(&self, user_id: Uuid) -> Result<Vec<MembershipRow>, AppError> {
        sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT t.tenant_id, t.schema_name, t.label, ut.is_primary
            FROM user_tenants ut
            JOIN tenants t ON t.tenant_id = ut.tenant_id
            WHERE ut.user_id = $1 AND ut.deleted_utc IS NULL
              AND t.deleted_utc IS NULL AND t.is_active = TRUE
            ORDER BY ut.is_primary DESC, ut.created_utc ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Check tenant membership.
    pub async fn is_member(&self, user_id: Uuid, tenant_id: Uuid) -> Result<bool, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_tenants WHERE user_id = $1 AND tenant_id = $2 AND deleted_utc IS NULL",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(count > 0)
    }

    /// Count the user's live memberships.
    pub async fn count_memberships(&self, user_id: Uuid) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_tenants WHERE user_id = $1 AND deleted_utc IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Insert a membership row inside a transaction.
    pub async fn insert_membership_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        tenant_id: Uuid,
        is_primary: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_tenants (user_id, tenant_id, is_primary, deleted_utc, created_utc)
            VALUES ($1, $2, $3, NULL, NOW())
            "#,
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(is_primary)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Make one membership primary and demote all others, atomically.
    pub async fn set_primary_tenant(&self, user_id: Uuid, tenant_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            "UPDATE user_tenants SET is_primary = FALSE WHERE user_id = $1 AND deleted_utc IS NULL",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        let result = sqlx::query(
            "UPDATE user_tenants SET is_primary = TRUE WHERE user_id = $1 AND tenant_id = $2 AND deleted_utc IS NULL",
        )
        .bind(user_id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("Membership not found")));
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== Role Operations ====================

    /// Find role by ID.
    pub async fn find_role_by_id(&self, role_id: Uuid) -> Result<Option<Role>, AppError> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE role_id = $1 AND deleted_utc IS NULL")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Load the user's role grants for one tenant: one row per
    /// (role, permission), assignment order preserved, permissions
    /// filtered to active and non-deleted.
    pub async fn find_role_grants(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<RoleGrantRow>, AppError> {
        sqlx::query_as::<_, RoleGrantRow>(
            r#"
            SELECT r.role_id, r.name AS role_name, p.name AS permission_name
            FROM user_roles ur
            JOIN roles r ON r.role_id = ur.role_id
                AND r.deleted_utc IS NULL AND r.is_active = TRUE
            LEFT JOIN role_permissions rp ON rp.role_id = r.role_id
            LEFT JOIN permissions p ON p.permission_id = rp.permission_id
                AND p.deleted_utc IS NULL AND p.is_active = TRUE
            WHERE ur.user_id = $1 AND ur.tenant_id = $2 AND ur.deleted_utc IS NULL
            ORDER BY ur.created_utc ASC, rp.created_utc ASC
            "#,
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Replace the user's role assignments for one tenant with a single
    /// role, inside a transaction. Enforces one role per user per tenant.
    pub async fn replace_user_roles_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE user_roles SET deleted_utc = NOW() WHERE user_id = $1 AND tenant_id = $2 AND deleted_utc IS NULL",
        )
        .bind(user_id)
        .bind(tenant_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id, tenant_id, deleted_utc, created_utc)
            VALUES ($1, $2, $3, NULL, NOW())
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .bind(tenant_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== Invitation Operations ====================

    /// Find a non-deleted invitation by its token hash.
    pub async fn find_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<UserInvitation>, AppError> {
        sqlx::query_as::<_, UserInvitation>(
            "SELECT * FROM user_invitations WHERE token_hash = $1 AND deleted_utc IS NULL",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find an invitation by ID, tombstoned rows included. The revoke
    /// idempotency guard needs to distinguish "already revoked" from
    /// "never existed".
    pub async fn find_invitation_by_id(
        &self,
        invitation_id: Uuid,
    ) -> Result<Option<UserInvitation>, AppError> {
        sqlx::query_as::<_, UserInvitation>(
            "SELECT * FROM user_invitations WHERE invitation_id = $1",
        )
        .bind(invitation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find the live invitation for a (user, tenant) pair, if any.
    pub async fn find_live_invitation(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<UserInvitation>, AppError> {
        sqlx::query_as::<_, UserInvitation>(
            "SELECT * FROM user_invitations WHERE user_id = $1 AND tenant_id = $2 AND deleted_utc IS NULL",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Insert an invitation inside a transaction (paired with placeholder
    /// user creation when the invitee is new).
    pub async fn insert_invitation_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        invitation: &UserInvitation,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_invitations (invitation_id, user_id, tenant_id, role_id,
                                          invited_by_user_id, token_hash, expiry_utc,
                                          deleted_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(invitation.invitation_id)
        .bind(invitation.user_id)
        .bind(invitation.tenant_id)
        .bind(invitation.role_id)
        .bind(invitation.invited_by_user_id)
        .bind(&invitation.token_hash)
        .bind(invitation.expiry_utc)
        .bind(invitation.deleted_utc)
        .bind(invitation.created_utc)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Replace the token on an existing invitation (resend). The prior
    /// plaintext becomes permanently unverifiable the moment this runs.
    pub async fn update_invitation_token(
        &self,
        invitation_id: Uuid,
        token_hash: &str,
        expiry_utc: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE user_invitations SET token_hash = $1, expiry_utc = $2 WHERE invitation_id = $3 AND deleted_utc IS NULL",
        )
        .bind(token_hash)
        .bind(expiry_utc)
        .bind(invitation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Revoke an invitation (tombstone).
    pub async fn revoke_invitation(&self, invitation_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE user_invitations SET deleted_utc = NOW() WHERE invitation_id = $1")
            .bind(invitation_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Consume an invitation inside the acceptance transaction.
    pub async fn consume_invitation_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        invitation_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE user_invitations SET deleted_utc = NOW() WHERE invitation_id = $1")
            .bind(invitation_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== Password Reset Operations ====================

    /// Insert a password reset token row.
    pub async fn insert_reset_token(&self, reset: &PasswordResetToken) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (reset_id, user_id, token_hash, expiry_utc,
                                               deleted_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(reset.reset_id)
        .bind(reset.user_id)
        .bind(&reset.token_hash)
        .bind(reset.expiry_utc)
        .bind(reset.deleted_utc)
        .bind(reset.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Find a live, unexpired reset token by its hash.
    pub async fn find_valid_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetToken>, AppError> {
        sqlx::query_as::<_, PasswordResetToken>(
            r#"
            SELECT * FROM password_reset_tokens
            WHERE token_hash = $1 AND deleted_utc IS NULL AND expiry_utc > NOW()
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Consume a reset token inside the reset transaction.
    pub async fn consume_reset_token_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        reset_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE password_reset_tokens SET deleted_utc = NOW() WHERE reset_id = $1")
            .bind(reset_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }
}
