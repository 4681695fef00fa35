//! Estimation hub server binary.
//!
//! Serves the live session WebSocket endpoints and a health check.

use std::sync::Arc;

use axum::{routing::get, Router};
use http::HeaderValue;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use estimation_hub::adapters::auth::{CookieSessionValidator, CookieValidatorConfig};
use estimation_hub::adapters::storage::{InMemorySessionStore, PostgresSessionStore};
use estimation_hub::adapters::websocket::{websocket_router, CookieNames, WebSocketState};
use estimation_hub::application::Hub;
use estimation_hub::config::{AppConfig, ConfigError, DatabaseConfig, ServerConfig};
use estimation_hub::ports::SessionStore;

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migrations failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = AppConfig::load()?;
    init_tracing(&config.server);
    config.validate().map_err(ConfigError::from)?;

    let store = connect_store(config.database.as_ref()).await?;
    let hub = Hub::new(store, config.hub.settings());

    let validator = Arc::new(CookieSessionValidator::new(CookieValidatorConfig {
        signing_secret: config.auth.signing_secret.clone(),
        allow_guests: config.auth.allow_guests,
    }));
    let cookies = CookieNames {
        session: config.auth.session_cookie.clone(),
        guest: config.auth.guest_cookie.clone(),
    };
    let state = WebSocketState::new(hub.clone(), validator, cookies);

    let app = Router::new()
        .route("/health", get(health))
        .nest("/api", websocket_router())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config.server)),
        );

    let addr = config
        .server
        .socket_addr()
        .map_err(ConfigError::from)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, environment = ?config.server.environment, "estimation hub listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await?;

    tracing::info!("estimation hub stopped");
    Ok(())
}

/// JSON logs in production, human-readable otherwise. `RUST_LOG` overrides
/// the configured filter.
fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&server.log_level));

    if server.is_production() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn connect_store(
    database: Option<&DatabaseConfig>,
) -> Result<Arc<dyn SessionStore>, StartupError> {
    let Some(database) = database else {
        tracing::warn!("no database configured, using in-memory session store");
        return Ok(Arc::new(InMemorySessionStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(database.max_connections)
        .min_connections(database.min_connections)
        .acquire_timeout(database.connect_timeout())
        .connect(&database.url)
        .await?;

    if database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("database migrations applied");
    }

    Ok(Arc::new(PostgresSessionStore::new(pool)))
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_origins_list()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
    } else if server.is_production() {
        CorsLayer::new()
    } else {
        CorsLayer::permissive()
    }
}

async fn health() -> &'static str {
    "OK"
}

/// Wait for Ctrl+C or SIGTERM, then end every live session so connected
/// clients receive `session_ended` before the listener stops.
async fn shutdown_signal(hub: Hub) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!(sessions = hub.session_count(), "shutting down live sessions");
    hub.shutdown().await;
}
