pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AuthConfig;
use crate::db::Database;
use crate::services::{
    AccessRequirements, AuthService, InvitationService, JwtService, PasskeyService, TokenCache,
    TotpService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub db: Database,
    pub jwt: JwtService,
    pub token_cache: TokenCache,
    pub auth_service: AuthService,
    pub totp_service: TotpService,
    pub passkey_service: PasskeyService,
    pub invitation_service: InvitationService,
}

pub fn build_router(state: AppState) -> Router {
    // Member provisioning is reserved for tenant administrators: either
    // an admin-tier role or the explicit invite permission suffices.
    let invitation_gate = AccessRequirements {
        roles: vec!["owner".to_string(), "admin".to_string()],
        permissions: vec!["members:invite".to_string()],
        ..Default::default()
    };

    // Public endpoints: credential entry points and invitee flows.
    let public_routes = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/login/otp", post(handlers::auth::login_otp))
        .route("/auth/login/totp", post(handlers::auth::login_totp))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/password/forgot", post(handlers::auth::forgot_password))
        .route("/auth/password/reset", post(handlers::auth::reset_password))
        .route(
            "/auth/passkeys/login/start",
            post(handlers::passkey::login_start),
        )
        .route(
            "/auth/passkeys/login/finish",
            post(handlers::passkey::login_finish),
        )
        .route("/invitations/verify/:token", get(handlers::invitation::verify))
        .route("/invitations/accept/:token", post(handlers::invitation::accept));

    // Authenticated endpoints.
    let session_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/password/change", post(handlers::auth::change_password))
        .route("/auth/mfa/email", post(handlers::mfa::set_email_mfa))
        .route("/auth/mfa/totp/setup", post(handlers::mfa::totp_setup))
        .route("/auth/mfa/totp/verify", post(handlers::mfa::totp_verify))
        .route("/auth/mfa/totp", delete(handlers::mfa::totp_disable))
        .route("/auth/passkeys", get(handlers::passkey::list))
        .route(
            "/auth/passkeys/register/start",
            post(handlers::passkey::register_start),
        )
        .route(
            "/auth/passkeys/register/finish",
            post(handlers::passkey::register_finish),
        )
        .route(
            "/auth/passkeys/:passkey_id",
            patch(handlers::passkey::rename).delete(handlers::passkey::revoke),
        )
        .route("/tenants/:tenant_id/primary", post(handlers::tenant::set_primary))
        .layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    // Tenant creation is reserved for platform operators.
    let tenant_gate = AccessRequirements::roles(["superadmin"]);
    let platform_routes = Router::new()
        .route("/tenants", post(handlers::tenant::create))
        .layer(from_fn(
            move |req: axum::extract::Request, next: axum::middleware::Next| {
                let requirements = tenant_gate.clone();
                async move { middleware::enforce_access(requirements, req, next).await }
            },
        ))
        .layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    // Authenticated + authorized endpoints.
    let admin_routes = Router::new()
        .route("/invitations", post(handlers::invitation::create))
        .route(
            "/invitations/:invitation_id",
            delete(handlers::invitation::revoke),
        )
        .route(
            "/invitations/:invitation_id/resend",
            post(handlers::invitation::resend),
        )
        .layer(from_fn(
            move |req: axum::extract::Request, next: axum::middleware::Next| {
                let requirements = invitation_gate.clone();
                async move { middleware::enforce_access(requirements, req, next).await }
            },
        ))
        .layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(platform_routes)
        .merge(admin_routes)
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .security
                        .allowed_origins
                        .iter()
                        .filter_map(|origin| origin.parse::<axum::http::HeaderValue>().ok())
                        .collect::<Vec<_>>(),
                )
                .allow_credentials(true)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PATCH,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                ]),
        )
}
