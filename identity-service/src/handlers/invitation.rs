//! Invitation endpoints: create/revoke/resend for tenant admins, verify
//! and accept for invitees.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use service_core::{error::AppError, response::ApiResponse};
use uuid::Uuid;
use validator::Validate;

use crate::middleware::CurrentUser;
use crate::models::invitation::InvitationResponse;
use crate::utils::ValidatedJson;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationRequest {
    #[validate(email)]
    pub email: String,
    pub tenant_id: Uuid,
    pub role_id: Uuid,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInvitationRequest {
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: Option<String>,
}

/// Creation response: the only moment the plaintext token exists outside
/// the invitee's inbox.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationBody {
    pub invitation: InvitationResponse,
    pub token: String,
}

/// POST /invitations
pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(req): ValidatedJson<CreateInvitationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (invitation, token) = state
        .invitation_service
        .create(user.0.sub, &req.email, req.tenant_id, req.role_id)
        .await?;

    Ok(ApiResponse::created(
        "Invitation created",
        CreateInvitationBody { invitation, token },
    ))
}

/// GET /invitations/verify/:token — read-only probe; tells the client
/// whether acceptance needs a password.
pub async fn verify(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let probe = state.invitation_service.verify(&token).await?;
    Ok(ApiResponse::ok("Invitation", probe))
}

/// POST /invitations/accept/:token
pub async fn accept(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Option<ValidatedJson<AcceptInvitationRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let password = body.and_then(|ValidatedJson(req)| req.password);

    let user = state.invitation_service.accept(&token, password).await?;
    Ok(ApiResponse::ok("Invitation accepted", user.sanitized()))
}

/// DELETE /invitations/:invitation_id
pub async fn revoke(
    State(state): State<AppState>,
    Path(invitation_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.invitation_service.revoke(invitation_id).await?;
    Ok(ApiResponse::ok("Invitation revoked", serde_json::json!({})))
}

/// POST /invitations/:invitation_id/resend — replaces the token; the new
/// one travels only by email.
pub async fn resend(
    State(state): State<AppState>,
    Path(invitation_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let invitation = state.invitation_service.resend(invitation_id).await?;
    Ok(ApiResponse::ok("Invitation resent", invitation))
}
