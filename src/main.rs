use anyhow::{Context, Result};
use broker_session::api::{create_session_router, SessionAppState};
use broker_session::cache::{MemoryTokenCache, RedisTokenCache, TokenCache};
use broker_session::clock::SystemClock;
use broker_session::config::{load_config_or_default, CacheBackend};
use broker_session::credentials::{CredentialStore, DEFAULT_PROFILE};
use broker_session::ledger::SqliteStatusLedger;
use broker_session::login::{CommandAuthenticator, HttpTokenExchanger};
use broker_session::scheduler::run_scheduler;
use broker_session::{Collaborators, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "broker_session=info".into()),
        )
        .init();

    info!("Broker session manager starting...");

    let config_path = std::env::var("BROKER_SESSION_CONFIG")
        .unwrap_or_else(|_| "broker-session.toml".to_string());
    let mut config = load_config_or_default(&config_path)?;
    config.apply_env_overrides()?;
    let policy = config.expiry.policy().context("Invalid [expiry] configuration")?;

    let encryption_key = std::env::var("BROKER_SESSION_ENCRYPTION_KEY")
        .context("BROKER_SESSION_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;
    let admin_token = std::env::var("BROKER_SESSION_ADMIN_TOKEN").ok();
    if admin_token.is_none() {
        warn!("BROKER_SESSION_ADMIN_TOKEN not set, admin routes are unrestricted");
    }

    info!(
        config_path = %config_path,
        ledger_path = %config.storage.ledger_path,
        credentials_path = %config.storage.credentials_path,
        cache_backend = ?config.cache.backend,
        timezone = %policy.timezone(),
        rollover = %policy.rollover(),
        api_port = config.api.port,
        "Configuration loaded"
    );

    // Stores
    let ledger = Arc::new(
        SqliteStatusLedger::new(&config.storage.ledger_path)
            .context("Failed to initialize status ledger")?,
    );
    let credential_store = Arc::new(
        CredentialStore::new(&config.storage.credentials_path, &encryption_key)
            .context("Failed to initialize credential store")?,
    );
    if credential_store.get(DEFAULT_PROFILE)?.is_none() {
        warn!("No broker credentials stored yet; PUT /api/session/credentials to configure");
    }

    let cache: Arc<dyn TokenCache> = match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryTokenCache::new()),
        CacheBackend::Redis => Arc::new(
            RedisTokenCache::connect(&config.cache.redis_url, config.cache.token_key.clone())
                .await
                .context("Failed to connect token cache")?,
        ),
    };

    // Collaborators
    let authenticator = Arc::new(CommandAuthenticator::new(
        config.login.command.clone(),
        config.login.args.clone(),
        config.broker.endpoints.authorize_url.clone(),
    ));
    let exchanger = Arc::new(HttpTokenExchanger::new(
        config.broker.endpoints.clone(),
        Duration::from_secs(config.broker.exchange_timeout_seconds),
    )?);

    let manager = SessionManager::new(
        Collaborators {
            ledger,
            cache,
            credentials: credential_store.clone(),
            authenticator,
            exchanger,
        },
        policy,
        Arc::new(SystemClock),
        config.manager_settings(),
    );
    manager
        .initialize()
        .await
        .context("Failed to seed status record")?;

    let scheduler_handle = if config.scheduler.enabled {
        Some(tokio::spawn(run_scheduler(
            manager.clone(),
            config.scheduler.interval_seconds,
        )))
    } else {
        info!("Renewal scheduler disabled");
        None
    };

    // Start HTTP API server
    let router = create_session_router(SessionAppState {
        manager,
        credential_store,
        admin_token,
    })
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.api.port))
        .await
        .context("Failed to bind session API port")?;
    info!(port = config.api.port, "Session API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Session API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    if let Some(handle) = scheduler_handle {
        handle.abort();
    }
    info!("Broker session manager stopped");

    Ok(())
}
