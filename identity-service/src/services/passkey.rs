//! WebAuthn (passkey) registration and authentication ceremonies.
//!
//! Ceremony state lives in the in-process [`ChallengeCache`] between the
//! start and finish calls. Registration state is keyed by user id;
//! authentication state is keyed by email for the identified flow or by
//! the challenge value itself for the usernameless flow.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use webauthn_rs::prelude::*;

use crate::config::WebauthnConfig;
use crate::db::Database;
use crate::models::{User, UserPasskey};
use crate::services::ChallengeCache;

const REG_KEY_PREFIX: &str = "reg:";
const AUTH_KEY_PREFIX: &str = "auth:";

/// Ceremony state parked between start and finish calls.
#[derive(Serialize, Deserialize)]
enum CachedCeremony {
    Registration {
        user_id: Uuid,
        state: PasskeyRegistration,
    },
    Authentication {
        state: PasskeyAuthentication,
    },
    Discoverable {
        state: DiscoverableAuthentication,
    },
}

#[derive(Clone)]
pub struct PasskeyService {
    webauthn: std::sync::Arc<Webauthn>,
    db: Database,
    challenges: ChallengeCache,
}

impl PasskeyService {
    pub fn new(
        db: Database,
        challenges: ChallengeCache,
        config: &WebauthnConfig,
    ) -> Result<Self, AppError> {
        let rp_origin = Url::parse(&config.origin)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid WEBAUTHN_ORIGIN: {}", e)))?;

        let webauthn = WebauthnBuilder::new(&config.rp_id, &rp_origin)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("WebAuthn builder error: {}", e)))?
            .rp_name(&config.rp_name)
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("WebAuthn build error: {}", e)))?;

        tracing::info!(
            rp_id = %config.rp_id,
            origin = %config.origin,
            "Passkey service initialized"
        );

        Ok(Self {
            webauthn: std::sync::Arc::new(webauthn),
            db,
            challenges,
        })
    }

    // ==================== Registration Ceremony ====================

    /// Begin registration: issue a challenge excluding credentials the
    /// user already owns, and park the ceremony state under the user id.
    pub async fn start_registration(
        &self,
        user: &User,
    ) -> Result<CreationChallengeResponse, AppError> {
        let existing = self.db.find_active_passkeys(user.user_id).await?;
        let exclude: Vec<CredentialID> = existing
            .iter()
            .filter_map(|p| URL_SAFE_NO_PAD.decode(&p.credential_id).ok())
            .map(CredentialID::from)
            .collect();

        let display_name = user.display_name.as_deref().unwrap_or(&user.email);
        let (ccr, state) = self
            .webauthn
            .start_passkey_registration(user.user_id, &user.email, display_name, Some(exclude))
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to start passkey registration");
                AppError::InternalError(anyhow::anyhow!("Failed to start passkey registration"))
            })?;

        self.cache_ceremony(
            format!("{}{}", REG_KEY_PREFIX, user.user_id),
            &CachedCeremony::Registration {
                user_id: user.user_id,
                state,
            },
        )?;

        tracing::debug!(user_id = %user.user_id, "Passkey registration started");
        Ok(ccr)
    }

    /// Verify the attestation, extract the credential and persist it.
    /// The parked challenge is discarded whether or not this succeeds.
    pub async fn finish_registration(
        &self,
        user: &User,
        attestation: RegisterPublicKeyCredential,
        label: Option<String>,
    ) -> Result<UserPasskey, AppError> {
        let state = match self.take_ceremony(&format!("{}{}", REG_KEY_PREFIX, user.user_id))? {
            Some(CachedCeremony::Registration { user_id, state }) if user_id == user.user_id => {
                state
            }
            _ => {
                return Err(AppError::BadRequest(anyhow::anyhow!("Challenge expired")));
            }
        };

        let transports = attestation.response.transports.clone();

        let passkey = self
            .webauthn
            .finish_passkey_registration(&attestation, &state)
            .map_err(|e| {
                tracing::warn!(error = %e, user_id = %user.user_id, "Passkey attestation rejected");
                AppError::BadRequest(anyhow::anyhow!("Attestation verification failed"))
            })?;

        let credential_id = URL_SAFE_NO_PAD.encode(passkey.cred_id());
        if self
            .db
            .find_passkey_by_credential_id(&credential_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Credential is already registered"
            )));
        }

        let public_key = serde_json::to_vec(&passkey).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to serialize passkey: {}", e))
        })?;

        let transports_json = transports
            .as_ref()
            .and_then(|t| serde_json::to_string(t).ok());
        let credential_type = credential_type_from_transports(transports_json.as_deref());

        let record = UserPasskey::new(
            user.user_id,
            credential_id,
            public_key,
            0,
            credential_type.to_string(),
            transports_json,
            false,
            false,
            label,
        );
        self.db.insert_passkey(&record).await?;

        tracing::info!(
            user_id = %user.user_id,
            passkey_id = %record.passkey_id,
            "Passkey registered"
        );
        Ok(record)
    }

    // ==================== Authentication Ceremony ====================

    /// Begin authentication. With an email this is the identified flow:
    /// the challenge is scoped to that user's credentials and parked
    /// under the lowercased email. Without one it is the usernameless
    /// flow and the state is parked under the challenge value itself.
    pub async fn start_authentication(
        &self,
        email: Option<&str>,
    ) -> Result<RequestChallengeResponse, AppError> {
        match email {
            Some(email) => {
                let user = self
                    .db
                    .find_user_by_email(email)
                    .await?
                    .filter(|u| u.is_active)
                    .ok_or_else(|| {
                        AppError::Unauthorized(anyhow::anyhow!("Passkey authentication failed"))
                    })?;

                let stored = self.db.find_active_passkeys(user.user_id).await?;
                let passkeys: Vec<Passkey> = stored
                    .iter()
                    .filter_map(|p| serde_json::from_slice(&p.public_key).ok())
                    .collect();
                if passkeys.is_empty() {
                    return Err(AppError::Unauthorized(anyhow::anyhow!(
                        "Passkey authentication failed"
                    )));
                }

                let (rcr, state) =
                    self.webauthn
                        .start_passkey_authentication(&passkeys)
                        .map_err(|e| {
                            tracing::error!(error = %e, "Failed to start passkey authentication");
                            AppError::InternalError(anyhow::anyhow!(
                                "Failed to start passkey authentication"
                            ))
                        })?;

                self.cache_ceremony(
                    format!("{}{}", AUTH_KEY_PREFIX, email.to_lowercase()),
                    &CachedCeremony::Authentication { state },
                )?;
                Ok(rcr)
            }
            None => {
                let (rcr, state) =
                    self.webauthn
                        .start_discoverable_authentication()
                        .map_err(|e| {
                            tracing::error!(error = %e, "Failed to start discoverable authentication");
                            AppError::InternalError(anyhow::anyhow!(
                                "Failed to start passkey authentication"
                            ))
                        })?;

                let challenge = URL_SAFE_NO_PAD.encode(rcr.public_key.challenge.as_ref());
                self.cache_ceremony(
                    format!("{}{}", AUTH_KEY_PREFIX, challenge),
                    &CachedCeremony::Discoverable { state },
                )?;
                Ok(rcr)
            }
        }
    }

    /// Verify the assertion and return the authenticated user. The
    /// parked state is located by the email key when one is supplied,
    /// falling back to the challenge value carried inside the assertion.
    /// An assertion whose counter does not exceed the stored counter is
    /// rejected outright.
    pub async fn finish_authentication(
        &self,
        assertion: PublicKeyCredential,
        email: Option<&str>,
    ) -> Result<User, AppError> {
        let ceremony = self.locate_auth_ceremony(&assertion, email)?;

        let credential_id = URL_SAFE_NO_PAD.encode(assertion.raw_id.as_ref());
        let stored = self
            .db
            .find_passkey_by_credential_id(&credential_id)
            .await?
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Passkey authentication failed"))
            })?;

        let result = match ceremony {
            CachedCeremony::Authentication { state } => self
                .webauthn
                .finish_passkey_authentication(&assertion, &state),
            CachedCeremony::Discoverable { state } => {
                let passkey: Passkey = serde_json::from_slice(&stored.public_key).map_err(|e| {
                    AppError::InternalError(anyhow::anyhow!("Invalid stored passkey: {}", e))
                })?;
                let keys = [DiscoverableKey::from(&passkey)];
                self.webauthn
                    .finish_discoverable_authentication(&assertion, state, &keys)
            }
            CachedCeremony::Registration { .. } => {
                return Err(AppError::BadRequest(anyhow::anyhow!("Challenge expired")));
            }
        }
        .map_err(|e| {
            tracing::warn!(error = %e, credential_id = %credential_id, "Passkey assertion rejected");
            AppError::Unauthorized(anyhow::anyhow!("Passkey authentication failed"))
        })?;

        // Counter progression is the clone/replay detection signal: a
        // successful assertion must move the counter strictly forward.
        let new_counter = i64::from(result.counter());
        if new_counter <= stored.sign_count {
            tracing::warn!(
                passkey_id = %stored.passkey_id,
                stored = stored.sign_count,
                received = new_counter,
                "Sign counter did not advance; rejecting assertion"
            );
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Passkey authentication failed"
            )));
        }

        self.db
            .record_passkey_use(stored.passkey_id, new_counter)
            .await?;

        if result.backup_eligible() != stored.backup_eligible
            || result.backup_state() != stored.backup_state
        {
            self.db
                .update_passkey_backup_state(
                    stored.passkey_id,
                    result.backup_eligible(),
                    result.backup_state(),
                )
                .await?;
        }

        let user = self
            .db
            .find_user_by_id(stored.user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Passkey authentication failed"))
            })?;

        tracing::info!(
            user_id = %user.user_id,
            passkey_id = %stored.passkey_id,
            "Passkey authentication completed"
        );
        Ok(user)
    }

    // ==================== Credential Management ====================

    pub async fn list_credentials(&self, user_id: Uuid) -> Result<Vec<UserPasskey>, AppError> {
        self.db.find_active_passkeys(user_id).await
    }

    pub async fn rename_credential(
        &self,
        passkey_id: Uuid,
        user_id: Uuid,
        label: &str,
    ) -> Result<(), AppError> {
        let updated = self.db.rename_passkey(passkey_id, user_id, label).await?;
        if updated == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("Passkey not found")));
        }
        Ok(())
    }

    pub async fn revoke_credential(&self, passkey_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        let updated = self.db.deactivate_passkey(passkey_id, user_id).await?;
        if updated == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("Passkey not found")));
        }
        tracing::info!(user_id = %user_id, passkey_id = %passkey_id, "Passkey revoked");
        Ok(())
    }

    // ==================== Internals ====================

    fn cache_ceremony(&self, key: String, ceremony: &CachedCeremony) -> Result<(), AppError> {
        let state_json = serde_json::to_string(ceremony).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to serialize ceremony state: {}", e))
        })?;
        self.challenges.insert(key, state_json);
        Ok(())
    }

    fn take_ceremony(&self, key: &str) -> Result<Option<CachedCeremony>, AppError> {
        match self.challenges.take(key) {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Challenge expired"))),
            None => Ok(None),
        }
    }

    fn locate_auth_ceremony(
        &self,
        assertion: &PublicKeyCredential,
        email: Option<&str>,
    ) -> Result<CachedCeremony, AppError> {
        if let Some(email) = email {
            let key = format!("{}{}", AUTH_KEY_PREFIX, email.to_lowercase());
            if let Some(ceremony) = self.take_ceremony(&key)? {
                return Ok(ceremony);
            }
        }

        if let Some(challenge) = challenge_from_assertion(assertion) {
            let key = format!("{}{}", AUTH_KEY_PREFIX, challenge);
            if let Some(ceremony) = self.take_ceremony(&key)? {
                return Ok(ceremony);
            }
        }

        Err(AppError::BadRequest(anyhow::anyhow!("Challenge expired")))
    }
}

/// The client echoes the challenge inside its signed clientDataJSON;
/// that value is the cache key for the usernameless flow.
fn challenge_from_assertion(assertion: &PublicKeyCredential) -> Option<String> {
    let client_data: serde_json::Value =
        serde_json::from_slice(assertion.response.client_data_json.as_ref()).ok()?;
    client_data
        .get("challenge")
        .and_then(|c| c.as_str())
        .map(|c| c.to_string())
}

/// Infer platform vs roaming from the serialized transport list the
/// client reported. Absent transports are treated as platform (the
/// common case for built-in authenticators).
fn credential_type_from_transports(transports_json: Option<&str>) -> &'static str {
    match transports_json {
        Some(json) if json.contains("\"internal\"") => "platform",
        Some(_) => "roaming",
        None => "platform",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_type_inference() {
        assert_eq!(
            credential_type_from_transports(Some(r#"["internal"]"#)),
            "platform"
        );
        assert_eq!(
            credential_type_from_transports(Some(r#"["usb","nfc"]"#)),
            "roaming"
        );
        assert_eq!(credential_type_from_transports(None), "platform");
    }
}
