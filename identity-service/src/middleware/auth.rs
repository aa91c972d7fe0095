//! Per-request access control: token verification with the process-wide
//! verified-token cache in front of full signature checks, plus
//! declarative role/permission gates.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::services::{AccessRequirements, AccessTokenClaims};
use crate::AppState;

pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// Claims of the authenticated caller, made available to handlers.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AccessTokenClaims);

/// Authentication gate. Accepts the access token from the Authorization
/// header or the session cookie; a cache hit skips signature
/// verification, a miss verifies in full and warms the cache.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)
        .or_else(|| cookie_token(&req))
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing authentication token")))?;

    let claims = match state.token_cache.get(&token) {
        Some(claims) => claims,
        None => {
            let claims = state.jwt.verify_access(&token)?;
            state.token_cache.insert(&token, claims.clone());
            claims
        }
    };

    req.extensions_mut().insert(CurrentUser(claims));
    Ok(next.run(req).await)
}

/// Authorization gate layered behind [`auth_middleware`]. Evaluates the
/// route's [`AccessRequirements`] against the caller's role and
/// permission claims.
pub async fn enforce_access(
    requirements: AccessRequirements,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = req.extensions().get::<CurrentUser>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!("Access gate ran without authentication"))
    })?;

    requirements.check(&user.0.role, &user.0.permissions)?;
    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}

fn cookie_token(req: &Request) -> Option<String> {
    CookieJar::from_headers(req.headers())
        .get(ACCESS_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<CurrentUser>().cloned().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Auth claims missing from request extensions"
            ))
        })
    }
}
