use identity_service::{
    build_router,
    config::{AuthConfig, Environment},
    db::{create_pool, Database},
    services::{
        AuthService, AuthzService, ChallengeCache, EmailOtpService, InvitationService, JwtService,
        NoopNotifier, NotificationSink, PasskeyService, SmtpNotifier, TokenCache, TotpService,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

const CHALLENGE_SWEEP_INTERVAL_SECONDS: u64 = 300;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid.
    let config = AuthConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    let pool = create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    let db = Database::new(pool);

    let notifier: Arc<dyn NotificationSink> = match config.environment {
        Environment::Prod => Arc::new(SmtpNotifier::new(&config.smtp)?),
        Environment::Dev if !config.smtp.user.is_empty() => {
            Arc::new(SmtpNotifier::new(&config.smtp)?)
        }
        Environment::Dev => Arc::new(NoopNotifier),
    };

    let jwt = JwtService::new(&config.jwt);
    let token_cache = TokenCache::new();
    let challenge_cache = ChallengeCache::new(config.webauthn.challenge_ttl_seconds);
    let _sweeper = challenge_cache.start_sweeper(CHALLENGE_SWEEP_INTERVAL_SECONDS);

    let authz = AuthzService::new(db.clone());
    let otp = EmailOtpService::new(db.clone(), notifier.clone(), config.mfa.otp_ttl_minutes);
    let totp = TotpService::new(db.clone(), notifier.clone(), config.mfa.totp_issuer.clone());
    let passkey = PasskeyService::new(db.clone(), challenge_cache.clone(), &config.webauthn)?;

    let auth = AuthService::new(
        db.clone(),
        jwt.clone(),
        token_cache.clone(),
        authz,
        otp,
        totp.clone(),
        notifier.clone(),
        config.password_reset.ttl_minutes,
        config.common.public_url.clone(),
    );

    let invitations = InvitationService::new(
        db.clone(),
        notifier.clone(),
        config.invitation.expiry_hours,
        config.common.public_url.clone(),
    );

    let state = AppState {
        config: config.clone(),
        db,
        jwt,
        token_cache,
        auth_service: auth,
        totp_service: totp,
        passkey_service: passkey,
        invitation_service: invitations,
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
