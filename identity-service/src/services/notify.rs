use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    Message,
    SmtpTransport,
    Transport,
};
use service_core::axum::async_trait;
use std::time::Duration;

use crate::config::SmtpConfig;

/// Notification kinds the core dispatches. Delivery is fire-and-forget:
/// a failed dispatch is logged and never fails the surrounding call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    PasswordReset,
    PasswordResetSuccess,
    MfaOtp,
    TotpSetup,
    Invitation,
    Welcome,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PasswordReset => "password-reset",
            NotificationKind::PasswordResetSuccess => "password-reset-success",
            NotificationKind::MfaOtp => "mfa-otp",
            NotificationKind::TotpSetup => "totp-setup",
            NotificationKind::Invitation => "invitation",
            NotificationKind::Welcome => "welcome",
        }
    }
}

/// Template context for one outbound notification.
#[derive(Debug, Clone, Default)]
pub struct NotificationPayload {
    pub to: String,
    pub display_name: Option<String>,
    /// Plaintext one-time token (reset, invitation).
    pub token: Option<String>,
    /// Short-lived numeric code (email OTP).
    pub code: Option<String>,
    pub tenant_label: Option<String>,
    pub link: Option<String>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Dispatch a notification. Implementations swallow and log their own
    /// failures; callers must be able to treat this as infallible.
    async fn notify(&self, kind: NotificationKind, payload: NotificationPayload);
}

/// SMTP-backed sink.
#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, service_core::error::AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| {
                service_core::error::AppError::InternalError(anyhow::anyhow!(e.to_string()))
            })?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "SMTP notifier initialized");

        Ok(Self {
            mailer,
            from_email: config.from_email.clone(),
        })
    }

    fn render(kind: NotificationKind, payload: &NotificationPayload) -> (String, String) {
        let name = payload.display_name.as_deref().unwrap_or("there");
        match kind {
            NotificationKind::PasswordReset => (
                "Reset your password".to_string(),
                format!(
                    "Hi {},\n\nWe received a request to reset your password. Use the link below within 60 minutes:\n\n{}\n\nIf you didn't request this, please ignore this email.",
                    name,
                    payload.link.as_deref().unwrap_or_default()
                ),
            ),
            NotificationKind::PasswordResetSuccess => (
                "Your password was changed".to_string(),
                format!(
                    "Hi {},\n\nYour password was just changed. If this wasn't you, contact support immediately.",
                    name
                ),
            ),
            NotificationKind::MfaOtp => (
                "Your sign-in code".to_string(),
                format!(
                    "Hi {},\n\nYour one-time sign-in code is: {}\n\nIt expires in 5 minutes.",
                    name,
                    payload.code.as_deref().unwrap_or_default()
                ),
            ),
            NotificationKind::TotpSetup => (
                "Authenticator app added".to_string(),
                format!(
                    "Hi {},\n\nAn authenticator app was set up on your account. Finish by confirming a code from the app.",
                    name
                ),
            ),
            NotificationKind::Invitation => (
                format!(
                    "You've been invited to {}",
                    payload.tenant_label.as_deref().unwrap_or("Ledgerline")
                ),
                format!(
                    "Hi {},\n\nYou've been invited to join {}. Accept the invitation here:\n\n{}",
                    name,
                    payload.tenant_label.as_deref().unwrap_or("Ledgerline"),
                    payload.link.as_deref().unwrap_or_default()
                ),
            ),
            NotificationKind::Welcome => (
                "Welcome to Ledgerline".to_string(),
                format!(
                    "Hi {},\n\nYour account is ready. You can sign in and start working with your team.",
                    name
                ),
            ),
        }
    }
}

#[async_trait]
impl NotificationSink for SmtpNotifier {
    async fn notify(&self, kind: NotificationKind, payload: NotificationPayload) {
        let (subject, body) = Self::render(kind, &payload);

        let message = match Message::builder()
            .from(match self.from_email.parse() {
                Ok(from) => from,
                Err(e) => {
                    tracing::error!(error = %e, "Invalid notification sender address");
                    return;
                }
            })
            .to(match payload.to.parse() {
                Ok(to) => to,
                Err(e) => {
                    tracing::error!(error = %e, kind = kind.as_str(), "Invalid recipient address");
                    return;
                }
            })
            .subject(&subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
        {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, kind = kind.as_str(), "Failed to build notification");
                return;
            }
        };

        // Send in a blocking thread to keep the async runtime clear.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&message)).await;

        match result {
            Ok(Ok(_)) => {
                tracing::info!(to = %payload.to, kind = kind.as_str(), "Notification sent");
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, to = %payload.to, kind = kind.as_str(), "Failed to send notification");
            }
            Err(e) => {
                tracing::error!(error = %e, kind = kind.as_str(), "Notification task panicked");
            }
        }
    }
}

/// Sink that drops everything. Used in tests and local development.
#[derive(Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn notify(&self, kind: NotificationKind, payload: NotificationPayload) {
        tracing::debug!(to = %payload.to, kind = kind.as_str(), "Notification dropped (noop sink)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_match_wire_format() {
        assert_eq!(NotificationKind::PasswordReset.as_str(), "password-reset");
        assert_eq!(NotificationKind::MfaOtp.as_str(), "mfa-otp");
        assert_eq!(NotificationKind::TotpSetup.as_str(), "totp-setup");
    }

    #[test]
    fn test_otp_body_carries_code() {
        let (subject, body) = SmtpNotifier::render(
            NotificationKind::MfaOtp,
            &NotificationPayload {
                to: "a@x.com".to_string(),
                code: Some("493021".to_string()),
                ..Default::default()
            },
        );
        assert!(!subject.is_empty());
        assert!(body.contains("493021"));
    }

    #[test]
    fn test_invitation_body_carries_link_and_tenant() {
        let (subject, body) = SmtpNotifier::render(
            NotificationKind::Invitation,
            &NotificationPayload {
                to: "a@x.com".to_string(),
                tenant_label: Some("Acme Books".to_string()),
                link: Some("https://app.example.com/invitations/tok".to_string()),
                ..Default::default()
            },
        );
        assert!(subject.contains("Acme Books"));
        assert!(body.contains("https://app.example.com/invitations/tok"));
    }
}
