use base64::{engine::general_purpose::STANDARD as base64_engine, Engine as _};
use rand::Rng;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use totp_lite::{totp_custom, Sha1};
use uuid::Uuid;

use crate::db::Database;
use crate::models::{User, UserAuthenticator};
use crate::services::{NotificationKind, NotificationPayload, NotificationSink};
use crate::utils::generate_numeric_code;

/// Standard TOTP parameters: 30 second step, 6 digits, SHA-1.
const TOTP_STEP_SECONDS: u64 = 30;
const TOTP_DIGITS: u32 = 6;
const SECRET_BYTES: usize = 20;
const BACKUP_CODE_COUNT: usize = 8;
const BACKUP_CODE_LENGTH: usize = 8;

/// Material returned once at setup time; the backup codes and the
/// provisioning URI are never shown again.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpSetup {
    pub otpauth_uri: String,
    pub backup_codes: Vec<String>,
}

/// Authenticator-app second factor with one-time backup codes.
#[derive(Clone)]
pub struct TotpService {
    db: Database,
    notifier: Arc<dyn NotificationSink>,
    issuer: String,
}

impl TotpService {
    pub fn new(db: Database, notifier: Arc<dyn NotificationSink>, issuer: String) -> Self {
        Self {
            db,
            notifier,
            issuer,
        }
    }

    /// Begin setup: generate a secret, a provisioning URI for the QR code
    /// and a batch of backup codes. The authenticator is stored inactive
    /// and unverified; prior setups are tombstoned. It does not count as
    /// a second factor until the user proves possession of a code.
    pub async fn setup(&self, user: &User) -> Result<TotpSetup, AppError> {
        let secret = generate_secret();
        let backup_codes: Vec<String> = (0..BACKUP_CODE_COUNT)
            .map(|_| generate_numeric_code(BACKUP_CODE_LENGTH))
            .collect();

        let authenticator = UserAuthenticator::new(user.user_id, secret.clone(), &backup_codes);
        self.db.replace_user_authenticator(&authenticator).await?;

        let notifier = self.notifier.clone();
        let payload = NotificationPayload {
            to: user.email.clone(),
            display_name: user.display_name.clone(),
            ..Default::default()
        };
        tokio::spawn(async move {
            notifier.notify(NotificationKind::TotpSetup, payload).await;
        });

        tracing::info!(user_id = %user.user_id, "TOTP setup started");

        Ok(TotpSetup {
            otpauth_uri: provisioning_uri(&self.issuer, &user.email, &secret),
            backup_codes,
        })
    }

    /// Prove possession of the pending authenticator. Success activates
    /// it, stamps the verification time and mirrors the flag onto the
    /// user row.
    pub async fn verify_and_enable(&self, user: &User, code: &str) -> Result<(), AppError> {
        let pending = self
            .db
            .find_pending_authenticator(user.user_id)
            .await?
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("No pending authenticator setup"))
            })?;

        if !verify_code(&pending.secret, code) {
            return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid TOTP code")));
        }

        self.db
            .enable_authenticator(pending.authenticator_id, user.user_id)
            .await?;

        tracing::info!(user_id = %user.user_id, "TOTP enabled");
        Ok(())
    }

    /// Validate a login-time code against the user's active and verified
    /// authenticator.
    pub async fn validate_login_code(&self, user_id: Uuid, code: &str) -> Result<(), AppError> {
        let authenticator = self
            .db
            .find_usable_authenticator(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid TOTP code")))?;

        if !verify_code(&authenticator.secret, code) {
            return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid TOTP code")));
        }

        self.db
            .touch_authenticator(authenticator.authenticator_id)
            .await?;
        Ok(())
    }

    /// Redeem a backup code. Each code works exactly once: a match
    /// rewrites the stored set without it.
    pub async fn verify_backup_code(&self, user_id: Uuid, code: &str) -> Result<(), AppError> {
        let authenticator = self
            .db
            .find_usable_authenticator(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid backup code")))?;

        let remaining = authenticator
            .consume_backup_code(code)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid backup code")))?;

        self.db
            .update_backup_codes(
                authenticator.authenticator_id,
                &UserAuthenticator::encode_backup_codes(&remaining),
            )
            .await?;

        tracing::info!(user_id = %user_id, remaining = remaining.len(), "Backup code redeemed");
        Ok(())
    }

    /// Tear down TOTP for the user: tombstone every authenticator row and
    /// clear the user's flag.
    pub async fn disable(&self, user_id: Uuid) -> Result<(), AppError> {
        self.db.disable_user_authenticators(user_id).await?;
        tracing::info!(user_id = %user_id, "TOTP disabled");
        Ok(())
    }
}

fn generate_secret() -> String {
    let mut rng = rand::thread_rng();
    let mut secret_bytes = [0u8; SECRET_BYTES];
    rng.fill(&mut secret_bytes);
    base64_engine.encode(secret_bytes)
}

fn provisioning_uri(issuer: &str, email: &str, secret: &str) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}",
        urlencoding::encode(issuer),
        urlencoding::encode(email),
        secret,
        urlencoding::encode(issuer),
    )
}

/// Verify a 6-digit code against the stored secret with a ±1 step window
/// to tolerate clock drift. Comparison per candidate is constant-time.
pub fn verify_code(secret: &str, code: &str) -> bool {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    verify_code_at(secret, code, now)
}

fn verify_code_at(secret: &str, code: &str, now: u64) -> bool {
    if code.len() != TOTP_DIGITS as usize {
        return false;
    }

    let secret_bytes = match base64_engine.decode(secret) {
        Ok(bytes) if bytes.len() == SECRET_BYTES => bytes,
        _ => return false,
    };

    let candidates = [
        now.saturating_sub(TOTP_STEP_SECONDS),
        now,
        now + TOTP_STEP_SECONDS,
    ];

    candidates.iter().any(|time| {
        let expected = totp_custom::<Sha1>(TOTP_STEP_SECONDS, TOTP_DIGITS, &secret_bytes, *time);
        bool::from(expected.as_bytes().ct_eq(code.as_bytes()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_at(secret: &str, time: u64) -> String {
        let bytes = base64_engine.decode(secret).unwrap();
        totp_custom::<Sha1>(TOTP_STEP_SECONDS, TOTP_DIGITS, &bytes, time)
    }

    #[test]
    fn test_secret_shape() {
        let secret = generate_secret();
        assert_eq!(base64_engine.decode(&secret).unwrap().len(), SECRET_BYTES);
    }

    #[test]
    fn test_provisioning_uri_format() {
        let uri = provisioning_uri("Ledgerline", "a@x.com", "c2VjcmV0");
        assert!(uri.starts_with("otpauth://totp/Ledgerline:a%40x.com?secret=c2VjcmV0"));
        assert!(uri.ends_with("issuer=Ledgerline"));
    }

    #[test]
    fn test_current_code_is_accepted() {
        let secret = generate_secret();
        let now = 1_700_000_000;
        assert!(verify_code_at(&secret, &code_at(&secret, now), now));
    }

    #[test]
    fn test_adjacent_steps_are_accepted() {
        let secret = generate_secret();
        let now = 1_700_000_000;
        assert!(verify_code_at(&secret, &code_at(&secret, now - 30), now));
        assert!(verify_code_at(&secret, &code_at(&secret, now + 30), now));
    }

    #[test]
    fn test_distant_steps_are_rejected() {
        let secret = generate_secret();
        let now = 1_700_000_000;
        // Codes from two or more steps away fall outside the window.
        let stale = code_at(&secret, now - 120);
        let future = code_at(&secret, now + 120);
        if stale != code_at(&secret, now - 30) && stale != code_at(&secret, now) {
            assert!(!verify_code_at(&secret, &stale, now));
        }
        if future != code_at(&secret, now + 30) && future != code_at(&secret, now) {
            assert!(!verify_code_at(&secret, &future, now));
        }
    }

    #[test]
    fn test_malformed_codes_are_rejected() {
        let secret = generate_secret();
        let now = 1_700_000_000;
        assert!(!verify_code_at(&secret, "12345", now));
        assert!(!verify_code_at(&secret, "1234567", now));
        assert!(!verify_code_at("not-base64!", "123456", now));
    }
}
