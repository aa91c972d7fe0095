//! Second-factor management endpoints (email OTP flag, TOTP lifecycle).

use axum::{extract::State, response::IntoResponse};
use serde::Deserialize;
use service_core::{error::AppError, response::ApiResponse};
use validator::Validate;

use crate::middleware::CurrentUser;
use crate::utils::ValidatedJson;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMfaRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TotpVerifyRequest {
    #[validate(length(equal = 6, message = "code must be 6 digits"))]
    pub code: String,
}

/// POST /auth/mfa/email — toggle the email-OTP second factor.
pub async fn set_email_mfa(
    State(state): State<AppState>,
    user: CurrentUser,
    axum::Json(req): axum::Json<EmailMfaRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.set_email_mfa(user.0.sub, req.enabled).await?;
    let message = if req.enabled {
        "Email verification codes enabled"
    } else {
        "Email verification codes disabled"
    };
    Ok(ApiResponse::ok(message, serde_json::json!({})))
}

/// POST /auth/mfa/totp/setup — start authenticator-app enrollment. The
/// provisioning URI and backup codes in the response are shown once.
pub async fn totp_setup(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .db
        .find_user_by_id(user.0.sub)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

    let setup = state.totp_service.setup(&account).await?;
    Ok(ApiResponse::ok("Scan the QR code and confirm a code", setup))
}

/// POST /auth/mfa/totp/verify — prove possession and enable the
/// authenticator.
pub async fn totp_verify(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(req): ValidatedJson<TotpVerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .db
        .find_user_by_id(user.0.sub)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

    state.totp_service.verify_and_enable(&account, &req.code).await?;
    Ok(ApiResponse::ok(
        "Authenticator app enabled",
        serde_json::json!({}),
    ))
}

/// DELETE /auth/mfa/totp — tear down the authenticator-app factor.
pub async fn totp_disable(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    state.totp_service.disable(user.0.sub).await?;
    Ok(ApiResponse::ok(
        "Authenticator app disabled",
        serde_json::json!({}),
    ))
}
