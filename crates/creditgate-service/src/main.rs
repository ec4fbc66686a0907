//! Creditgate Service - metered access control over HTTP
//!
//! This is the main entry point for the creditgate service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use creditgate_meter::RateLimiter;
use creditgate_service::{create_router, AppState, ServiceConfig, StoreBackend};
use creditgate_store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,creditgate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Creditgate Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        store_backend = ?config.store_backend,
        jwt_configured = %config.jwt_secret.is_some(),
        billable_endpoints = config.billable.iter().count(),
        "Service configuration loaded"
    );

    let store = open_store(&config).await?;

    // Build app state
    let state = AppState::new(store, config.clone());

    if config.rate_limit_cleanup_seconds > 0 {
        spawn_cleanup(
            state.limiter.clone(),
            Duration::from_secs(config.rate_limit_cleanup_seconds),
        );
    }

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Open the configured storage backend.
async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store - data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL is required for the postgres backend")?;
            tracing::info!("Connecting to PostgreSQL");
            let store = PgStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            tracing::info!("Database migrations applied");
            Ok(Arc::new(store))
        }
        StoreBackend::Rocksdb => open_rocks(&config.data_dir),
    }
}

#[cfg(feature = "rocksdb-backend")]
fn open_rocks(data_dir: &str) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::info!(path = %data_dir, "Opening RocksDB store");
    Ok(Arc::new(creditgate_store::RocksStore::open(data_dir)?))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_rocks(_data_dir: &str) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    Err("this build does not include the rocksdb-backend feature".into())
}

/// Purge expired rate-limit rows on a fixed interval.
fn spawn_cleanup(limiter: Arc<RateLimiter>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            match limiter.cleanup().await {
                Ok(removed) => tracing::debug!(removed, "Rate-limit cleanup finished"),
                Err(e) => tracing::error!(error = %e, "Rate-limit cleanup failed"),
            }
        }
    });
}
