//! WebAuthn (passkey) endpoints: registration and authentication
//! ceremonies plus credential management.

use axum::{
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use service_core::{error::AppError, response::ApiResponse};
use std::net::SocketAddr;
use uuid::Uuid;
use validator::Validate;
use webauthn_rs::prelude::{PublicKeyCredential, RegisterPublicKeyCredential};

use crate::handlers::{client_meta, set_session_cookies, SessionBody};
use crate::middleware::CurrentUser;
use crate::models::passkey::PasskeyResponse;
use crate::utils::ValidatedJson;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishRegistrationRequest {
    pub credential: RegisterPublicKeyCredential,
    pub label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAuthenticationRequest {
    /// Present for the identified flow, absent for usernameless.
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishAuthenticationRequest {
    pub credential: PublicKeyCredential,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RenamePasskeyRequest {
    #[validate(length(min = 1, max = 64, message = "label must be 1-64 characters"))]
    pub label: String,
}

/// POST /auth/passkeys/register/start
pub async fn register_start(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .db
        .find_user_by_id(user.0.sub)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

    let options = state.passkey_service.start_registration(&account).await?;
    Ok(ApiResponse::ok("Passkey registration started", options))
}

/// POST /auth/passkeys/register/finish
pub async fn register_finish(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<FinishRegistrationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .db
        .find_user_by_id(user.0.sub)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

    let record = state
        .passkey_service
        .finish_registration(&account, req.credential, req.label)
        .await?;

    Ok(ApiResponse::created(
        "Passkey registered",
        PasskeyResponse::from(record),
    ))
}

/// POST /auth/passkeys/login/start — public; with an email this scopes
/// the challenge to that user's credentials, without one it starts a
/// usernameless ceremony.
pub async fn login_start(
    State(state): State<AppState>,
    body: Option<Json<StartAuthenticationRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let email = body.and_then(|Json(req)| req.email);

    let options = state
        .passkey_service
        .start_authentication(email.as_deref())
        .await?;
    Ok(ApiResponse::ok("Passkey authentication started", options))
}

/// POST /auth/passkeys/login/finish — verify the assertion and establish
/// a session.
pub async fn login_finish(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<FinishAuthenticationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .passkey_service
        .finish_authentication(req.credential, req.email.as_deref())
        .await?;

    let meta = client_meta(&headers, addr);
    let session = state.auth_service.establish_session(&user, &meta).await?;

    let jar = set_session_cookies(jar, &session, state.config.security.cookie_secure);
    Ok((
        jar,
        ApiResponse::ok("Login successful", SessionBody::from(session)),
    ))
}

/// GET /auth/passkeys
pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let credentials = state.passkey_service.list_credentials(user.0.sub).await?;
    let response: Vec<PasskeyResponse> = credentials.into_iter().map(Into::into).collect();
    Ok(ApiResponse::ok("Passkeys", response))
}

/// PATCH /auth/passkeys/:passkey_id
pub async fn rename(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(passkey_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<RenamePasskeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .passkey_service
        .rename_credential(passkey_id, user.0.sub, &req.label)
        .await?;
    Ok(ApiResponse::ok("Passkey renamed", serde_json::json!({})))
}

/// DELETE /auth/passkeys/:passkey_id
pub async fn revoke(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(passkey_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .passkey_service
        .revoke_credential(passkey_id, user.0.sub)
        .await?;
    Ok(ApiResponse::ok("Passkey removed", serde_json::json!({})))
}
