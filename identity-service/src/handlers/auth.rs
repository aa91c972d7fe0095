//! Login, MFA login steps, refresh, logout and password endpoints.

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use service_core::{error::AppError, response::ApiResponse};
use std::net::SocketAddr;
use validator::Validate;

use crate::handlers::{clear_session_cookies, client_meta, set_session_cookies, SessionBody};
use crate::middleware::{CurrentUser, REFRESH_TOKEN_COOKIE};
use crate::services::{LoginOutcome, MfaType};
use crate::utils::ValidatedJson;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OtpLoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(equal = 6, message = "code must be 6 digits"))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TotpLoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, message = "code is required"))]
    pub code: String,
    #[serde(default)]
    pub is_backup_code: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "token is required"))]
    pub token: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "current password is required"))]
    pub current_password: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub new_password: String,
}

/// MFA-pending login response; HTTP 200, not an error.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaPendingBody {
    pub requires_mfa: bool,
    pub mfa_type: MfaType,
    pub email: String,
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Response, AppError> {
    let meta = client_meta(&headers, addr);
    let outcome = state.auth_service.login(&req.email, &req.password, meta).await?;

    match outcome {
        LoginOutcome::MfaRequired { mfa_type, email } => Ok(ApiResponse::ok(
            "Additional verification required",
            MfaPendingBody {
                requires_mfa: true,
                mfa_type,
                email,
            },
        )
        .into_response()),
        LoginOutcome::Session(session) => {
            let jar = set_session_cookies(jar, &session, state.config.security.cookie_secure);
            Ok((
                jar,
                ApiResponse::ok("Login successful", SessionBody::from(*session)),
            )
                .into_response())
        }
    }
}

/// POST /auth/login/otp — resume a login paused on the email OTP factor.
pub async fn login_otp(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<OtpLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let meta = client_meta(&headers, addr);
    let session = state
        .auth_service
        .verify_email_otp(&req.email, &req.code, meta)
        .await?;

    let jar = set_session_cookies(jar, &session, state.config.security.cookie_secure);
    Ok((
        jar,
        ApiResponse::ok("Login successful", SessionBody::from(session)),
    ))
}

/// POST /auth/login/totp — resume a login paused on the TOTP factor.
pub async fn login_totp(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<TotpLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let meta = client_meta(&headers, addr);
    let session = state
        .auth_service
        .verify_totp(&req.email, &req.code, req.is_backup_code, meta)
        .await?;

    let jar = set_session_cookies(jar, &session, state.config.security.cookie_secure);
    Ok((
        jar,
        ApiResponse::ok("Login successful", SessionBody::from(session)),
    ))
}

/// POST /auth/refresh — rotate the refresh token, taken from the cookie
/// or the body.
pub async fn refresh(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let presented = jar
        .get(REFRESH_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .or_else(|| body.and_then(|Json(req)| req.refresh_token))
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid token")))?;

    let meta = client_meta(&headers, addr);
    let session = state.auth_service.refresh(&presented, meta).await?;

    let jar = set_session_cookies(jar, &session, state.config.security.cookie_secure);
    Ok((
        jar,
        ApiResponse::ok("Token refreshed", SessionBody::from(session)),
    ))
}

/// POST /auth/logout — revoke every refresh token across devices.
pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.logout(user.0.sub).await?;

    let jar = clear_session_cookies(jar);
    Ok((
        jar,
        ApiResponse::ok("Logged out successfully", serde_json::json!({})),
    ))
}

/// POST /auth/password/forgot — always the same generic answer, whether
/// or not the account exists.
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.forgot_password(&req.email).await?;
    Ok(ApiResponse::ok(
        "If that email exists, a reset link has been sent",
        serde_json::json!({}),
    ))
}

/// POST /auth/password/reset
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .reset_password(&req.token, &req.new_password)
        .await?;
    Ok(ApiResponse::ok(
        "Password has been reset",
        serde_json::json!({}),
    ))
}

/// POST /auth/password/change
pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .change_password(user.0.sub, &req.current_password, &req.new_password)
        .await?;
    Ok(ApiResponse::ok(
        "Password has been changed",
        serde_json::json!({}),
    ))
}

/// GET /auth/me — profile resolved fresh from the store.
pub async fn me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let profile = state.auth_service.profile(user.0.sub).await?;
    Ok(ApiResponse::ok("Profile", profile))
}
