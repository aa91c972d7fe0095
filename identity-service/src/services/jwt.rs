use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::config::JwtConfig;

/// JWT service for token generation and validation.
///
/// Access and refresh tokens are signed with independent secrets and
/// carry independent expiries. The refresh token embeds only the user id
/// so rotated tokens never carry stale authorization claims.
#[derive(Clone)]
pub struct JwtService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

/// Claims for access tokens (short-lived). Authorization is frozen at
/// issuance; changes propagate on refresh or natural expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub role: String,
    pub permissions: Vec<String>,
    /// Tenant the session is acting in
    pub tenant_id: Uuid,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Claims for refresh tokens (long-lived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// Payload signed into a fresh access token.
#[derive(Debug, Clone)]
pub struct AccessTokenPayload {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub tenant_id: Uuid,
}

/// A freshly signed token pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_claims: AccessTokenClaims,
    pub refresh_expiry_utc: DateTime<Utc>,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        }
    }

    /// Sign an access/refresh pair for an authorized user.
    pub fn issue_pair(&self, payload: AccessTokenPayload) -> Result<TokenPair, AppError> {
        let now = Utc::now();
        let access_exp = now + Duration::minutes(self.access_token_expiry_minutes);
        let refresh_exp = now + Duration::days(self.refresh_token_expiry_days);

        let access_claims = AccessTokenClaims {
            sub: payload.user_id,
            name: payload.name,
            email: payload.email,
            role: payload.role,
            permissions: payload.permissions,
            tenant_id: payload.tenant_id,
            iat: now.timestamp(),
            exp: access_exp.timestamp(),
        };

        let refresh_claims = RefreshTokenClaims {
            sub: payload.user_id,
            iat: now.timestamp(),
            exp: refresh_exp.timestamp(),
        };

        let header = Header::new(Algorithm::HS256);
        let access_token = encode(&header, &access_claims, &self.access_encoding)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to encode access token: {}", e)))?;
        let refresh_token = encode(&header, &refresh_claims, &self.refresh_encoding)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to encode refresh token: {}", e)))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_claims,
            refresh_expiry_utc: refresh_exp,
        })
    }

    /// Validate signature and expiry of an access token.
    pub fn verify_access(&self, token: &str) -> Result<AccessTokenClaims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        decode::<AccessTokenClaims>(token, &self.access_decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token")))
    }

    /// Validate signature and expiry of a refresh token.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshTokenClaims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        decode::<RefreshTokenClaims>(token, &self.refresh_decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid token")))
    }

    /// Access token expiry in seconds (for client info).
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig {
            access_secret: "access-secret-for-tests".to_string(),
            refresh_secret: "refresh-secret-for-tests".to_string(),
            access_token_expiry_minutes: 60,
            refresh_token_expiry_days: 7,
        }
    }

    fn payload() -> AccessTokenPayload {
        AccessTokenPayload {
            user_id: Uuid::new_v4(),
            name: Some("Ada".to_string()),
            email: "a@x.com".to_string(),
            role: "accountant".to_string(),
            permissions: vec!["ledger:read".to_string(), "ledger:write".to_string()],
            tenant_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_issue_and_verify_pair() {
        let service = JwtService::new(&test_config());
        let input = payload();
        let user_id = input.user_id;
        let tenant_id = input.tenant_id;

        let pair = service.issue_pair(input).unwrap();

        let access = service.verify_access(&pair.access_token).unwrap();
        assert_eq!(access.sub, user_id);
        assert_eq!(access.tenant_id, tenant_id);
        assert_eq!(access.role, "accountant");
        assert_eq!(access.permissions.len(), 2);

        let refresh = service.verify_refresh(&pair.refresh_token).unwrap();
        assert_eq!(refresh.sub, user_id);
        assert_eq!(refresh.exp, pair.refresh_expiry_utc.timestamp());
    }

    #[test]
    fn test_tokens_are_not_interchangeable() {
        let service = JwtService::new(&test_config());
        let pair = service.issue_pair(payload()).unwrap();

        // Signed with different secrets, so neither verifies as the other.
        assert!(service.verify_access(&pair.refresh_token).is_err());
        assert!(service.verify_refresh(&pair.access_token).is_err());
    }

    #[test]
    fn test_tampered_token_is_rejected() {
        let service = JwtService::new(&test_config());
        let pair = service.issue_pair(payload()).unwrap();

        let mut tampered = pair.access_token.clone();
        tampered.pop();
        tampered.push('A');
        assert!(service.verify_access(&tampered).is_err());
    }

    #[test]
    fn test_refresh_claims_stay_lightweight() {
        let service = JwtService::new(&test_config());
        let pair = service.issue_pair(payload()).unwrap();

        // Refresh token body must not embed authorization claims.
        let body = pair.refresh_token.split('.').nth(1).unwrap();
        use base64::Engine as _;
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(body)
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert!(json.get("role").is_none());
        assert!(json.get("permissions").is_none());
        assert!(json.get("sub").is_some());
    }
}
