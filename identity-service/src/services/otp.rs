use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{EmailOtp, User};
use crate::services::{NotificationKind, NotificationPayload, NotificationSink};
use crate::utils::generate_numeric_code;

pub const OTP_CODE_LENGTH: usize = 6;

/// Email OTP second factor.
///
/// Issuing a code tombstones every prior live code for the user, so at
/// most one code is ever valid; verification consumes the matched code.
#[derive(Clone)]
pub struct EmailOtpService {
    db: Database,
    notifier: Arc<dyn NotificationSink>,
    ttl_minutes: i64,
}

impl EmailOtpService {
    pub fn new(db: Database, notifier: Arc<dyn NotificationSink>, ttl_minutes: i64) -> Self {
        Self {
            db,
            notifier,
            ttl_minutes,
        }
    }

    /// Generate, persist and dispatch a fresh code. Dispatch failures are
    /// the sink's problem; the login call must not learn about them.
    pub async fn issue(
        &self,
        user: &User,
        user_agent: Option<String>,
        ip_address: Option<String>,
    ) -> Result<(), AppError> {
        let code = generate_numeric_code(OTP_CODE_LENGTH);
        let otp = EmailOtp::new(user.user_id, &code, self.ttl_minutes, user_agent, ip_address);

        self.db.replace_user_otp(&otp).await?;

        let notifier = self.notifier.clone();
        let payload = NotificationPayload {
            to: user.email.clone(),
            display_name: user.display_name.clone(),
            code: Some(code),
            ..Default::default()
        };
        tokio::spawn(async move {
            notifier.notify(NotificationKind::MfaOtp, payload).await;
        });

        tracing::info!(user_id = %user.user_id, "Email OTP issued");
        Ok(())
    }

    /// Verify a presented code for the user. Missing, already used and
    /// expired all collapse into the same rejection.
    pub async fn verify(&self, user_id: Uuid, code: &str) -> Result<(), AppError> {
        let code_hash = EmailOtp::hash_code(code.trim());

        let otp = self
            .db
            .find_valid_otp(user_id, &code_hash)
            .await?
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid or expired code")))?;

        // One-time use.
        self.db.consume_otp(otp.otp_id).await?;

        tracing::info!(user_id = %user_id, "Email OTP verified");
        Ok(())
    }
}
