use chrono::Utc;
use gradebook_platform_access::{CredentialCipher, InvitationMailer, SessionStore};
use gradebook_server::{
    app,
    auth::{AppState, GoogleOAuthClient, PgIdentityStore, PgProfileStore, PgSessionStore, Stores},
    config::ServerConfig,
    mail::{LogMailer, SmtpMailer},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!(environment = %config.environment, "Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let sessions = Arc::new(PgSessionStore::new(db_pool.clone()));
    let stores = Stores {
        identities: Arc::new(PgIdentityStore::new(db_pool.clone())),
        profiles: Arc::new(PgProfileStore::new(db_pool.clone())),
        sessions: sessions.clone(),
    };

    // Cleanup expired sessions on startup
    match sessions.delete_expired(Utc::now()).await {
        Ok(count) if count > 0 => {
            tracing::info!(
                deleted_sessions = count,
                "Cleaned up expired sessions on startup"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to cleanup expired sessions on startup");
        }
    }

    // Spawn periodic session cleanup task
    let cleanup_sessions = sessions.clone();
    let cleanup_interval_secs = config.session.cleanup_interval_seconds;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(cleanup_interval_secs));
        loop {
            interval.tick().await;
            match cleanup_sessions.delete_expired(Utc::now()).await {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted_sessions = count, "Periodic session cleanup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to cleanup expired sessions");
                }
            }
        }
    });

    // Refresh token cipher
    let key_material = config
        .cipher
        .resolve(config.environment)
        .expect("invalid cipher configuration");
    if key_material.fallback {
        tracing::warn!(
            "CIPHER__SECRET or CIPHER__SALT not set, using development key material; \
             refresh tokens are not safely encrypted"
        );
    }
    let cipher = CredentialCipher::from_secret(&key_material.secret, &key_material.salt)
        .expect("failed to derive cipher key");

    // Identity provider
    let google = GoogleOAuthClient::new(&config.google).expect("invalid Google OAuth configuration");
    if !google.is_configured() {
        tracing::warn!("Google OAuth credentials not set, sign-in is unavailable");
    }

    // Invitation mailer
    let mailer: Arc<dyn InvitationMailer> = if config.smtp.host.is_some() {
        Arc::new(SmtpMailer::new(&config.smtp, &config.front_url).expect("invalid SMTP configuration"))
    } else {
        tracing::info!("SMTP__HOST not set, invitations will be logged only");
        Arc::new(LogMailer::new(&config.front_url))
    };

    let bind_address = config.bind_address.clone();
    let app_state = Arc::new(AppState::new(
        config.environment,
        config.front_url,
        config.session,
        stores,
        Arc::new(google),
        Arc::new(cipher),
        mailer,
    ));
    let app = app::router(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", bind_address);

    axum::serve(listener, app.into_make_service())
        .await
        .expect("server error");
}
