use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

mod app;
mod auth;
mod config;
mod db;
mod error;
mod handlers;

use app::{AppState, build_router};
use auth::clock::{Clock, SystemClock};
use auth::identity::GoogleIdentityVerifier;
use auth::jwt::{JwtManager, JwtOptions};
use auth::services::SessionService;
use config::{Config, SessionStoreKind};
use db::connection::{DEFAULT_POOL_SIZE, create_pool};
use db::memory::MemoryStore;
use db::repositories::refresh_token_repository::RefreshTokenRepository;
use db::repositories::user_repository::UserRepository;
use db::repositories::{RefreshTokenStore, UserDirectory};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Stores = (Arc<dyn UserDirectory>, Arc<dyn RefreshTokenStore>);

pub fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Defaults when RUST_LOG is not set
        tracing_subscriber::EnvFilter::new(
            "info,session_manager=debug,hyper_util=warn,tower_http=info",
        )
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_stores(config: &Config) -> anyhow::Result<Stores> {
    match config.session_store {
        SessionStoreKind::Postgres => {
            let pool = create_pool(&config.database_url, DEFAULT_POOL_SIZE)?;
            Ok((
                Arc::new(UserRepository::new(pool.clone())),
                Arc::new(RefreshTokenRepository::new(pool)),
            ))
        }
        SessionStoreKind::Memory => {
            tracing::warn!("⚠️  Using the in-memory session store, sessions are lost on restart");
            let store = MemoryStore::new();
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
    }
}

/// Periodically purges expired refresh tokens in local server mode.
fn spawn_cleanup_task(sessions: Arc<SessionService>, interval_minutes: u64) {
    if interval_minutes == 0 {
        tracing::info!("Token cleanup task disabled");
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
        loop {
            ticker.tick().await;
            let sessions = sessions.clone();
            match tokio::task::spawn_blocking(move || sessions.cleanup_expired_tokens()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Token cleanup failed"),
                Err(e) => tracing::error!(error = %e, "Token cleanup task panicked"),
            }
        }
    });
}

// ----------------- Main -----------------

#[tokio::main]
async fn main() -> Result<(), lambda_http::Error> {
    setup_logging();
    tracing::info!("Starting session-manager...");

    let config = Config::from_env()?;
    tracing::info!(
        environment = config.environment.as_str(),
        store = ?config.session_store,
        "Configuration ready"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let jwt_options = JwtOptions {
        issuer: config.jwt_issuer.clone(),
        audience: config.jwt_audience.clone(),
        access_token_minutes: config.access_token_minutes,
    };
    let jwt_manager = JwtManager::new(&config.jwt_secret, jwt_options, clock.clone())?;

    let (users, tokens) = build_stores(&config)?;
    let sessions = Arc::new(SessionService::new(
        jwt_manager,
        users,
        tokens,
        clock,
        config.refresh_token_days,
    ));

    let state = AppState {
        sessions: sessions.clone(),
        identity: Arc::new(GoogleIdentityVerifier::new(config.google_client_id.clone())),
    };
    let app = build_router(state, &config.frontend_url);

    if env::var("AWS_LAMBDA_FUNCTION_NAME").is_ok() {
        // Cleanup runs from an external schedule in Lambda
        tracing::info!("Running in Lambda mode");
        lambda_http::run(app).await
    } else {
        tracing::info!("Running in local HTTP server mode");
        spawn_cleanup_task(sessions, config.cleanup_interval_minutes);

        let addr = format!("{}:{}", config.server_host, config.server_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("🚀 Server running at http://{}", addr);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}
