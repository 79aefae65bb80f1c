use anyhow::Context;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kiln_blob::FsBlobStore;
use kiln_queue::PgWorkQueue;

pub mod api;
pub mod config;
pub mod db;
pub mod provider;
pub mod repository;
pub mod service;
pub mod state;
pub mod storage;

#[cfg(test)]
mod testing;

use config::Config;
use provider::ProviderRegistry;
use state::AppState;
use storage::PgStorage;

/// Lease the coordinator's queue handle would use; it only ever publishes
const PUBLISH_ONLY_LEASE: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Kiln Coordinator...");

    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Connecting to database...");

    // Create database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database connection pool created");

    // Run migrations
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let providers = ProviderRegistry::from_config(&config)?;
    tracing::info!(
        "Providers registered: {}",
        providers.names().collect::<Vec<_>>().join(", ")
    );

    tokio::fs::create_dir_all(&config.log_store_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.log_store_dir.display()))?;
    let blobs = FsBlobStore::new(config.log_store_dir.clone());

    let state = AppState {
        storage: Arc::new(PgStorage::new(pool.clone())),
        queue: Arc::new(PgWorkQueue::new(
            pool,
            config.work_queue.clone(),
            PUBLISH_ONLY_LEASE,
        )),
        blobs: Arc::new(blobs),
        providers: Arc::new(providers),
        config: Arc::new(config.clone()),
    };

    let app = api::create_router(state.clone());
    let rpc = api::create_rpc_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    let rpc_listener = tokio::net::TcpListener::bind(&config.rpc_bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.rpc_bind_addr))?;

    tracing::info!("Listening on {}", config.bind_addr);
    tracing::info!("RPC listening on {}", config.rpc_bind_addr);

    tokio::try_join!(
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .into_future(),
        axum::serve(rpc_listener, rpc)
            .with_graceful_shutdown(shutdown_signal())
            .into_future(),
    )
    .context("Server error")?;

    tracing::info!("Coordinator stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
