//! Kiln Runner
//!
//! A stateless worker that executes pipelines in throwaway containers.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: HTTP reporting to the coordinator
//! - Services: Pipeline execution (fetch, parse, provision, run, teardown)
//! - Scheduler: Work queue consumption with a bounded worker pool
//!
//! The runner receives work items from the queue, runs each pipeline's
//! commands inside a container, stores the transcript in the shared log
//! store and reports every lifecycle event back to the coordinator.

mod config;
mod container;
mod git;
mod podman;
mod repository;
mod scheduler;
mod service;

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::git::GitFetcher;
use crate::podman::PodmanDriver;
use crate::repository::HttpStateReporter;
use crate::scheduler::WorkConsumer;
use crate::service::{ExecutionService, PipelineExecutor};
use kiln_blob::FsBlobStore;
use kiln_client::CoordinatorClient;
use kiln_queue::{PgWorkQueue, WorkQueue};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kiln Runner");

    let config = Config::from_env()?;
    config.validate()?;
    info!(
        "Loaded configuration: runner_id={}, coordinator_url={}",
        config.runner_id, config.coordinator_url
    );

    let driver = PodmanDriver::new(config.container_runtime.clone());
    driver
        .check_available()
        .await
        .context("Container runtime unavailable")?;
    info!("Container runtime '{}' available", config.container_runtime);

    // Connect to the queue (with retry logic)
    let pool = connect_with_retry(&config).await?;
    let queue: Arc<dyn WorkQueue> = Arc::new(PgWorkQueue::new(
        pool,
        config.work_queue.clone(),
        config.queue_lease,
    ));
    info!("Connected to work queue '{}'", config.work_queue);

    tokio::fs::create_dir_all(&config.log_store_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.log_store_dir.display()))?;
    tokio::fs::create_dir_all(&config.workspace_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.workspace_dir.display()))?;

    let client = CoordinatorClient::with_timeout(&config.coordinator_url, config.report_timeout)
        .context("Failed to build coordinator client")?;

    let executor: Arc<dyn ExecutionService> = Arc::new(PipelineExecutor::new(
        config.runner_id.clone(),
        Arc::new(GitFetcher::new()),
        Arc::new(driver),
        Arc::new(FsBlobStore::new(config.log_store_dir.clone())),
        Arc::new(HttpStateReporter::new(client)),
        config.workspace_dir.clone(),
        config.pipeline_timeout,
    ));

    info!("Runner initialized successfully");
    info!(
        "Workers: {}, pipeline timeout: {:?}, queue lease: {:?}",
        config.max_parallel_pipelines, config.pipeline_timeout, config.queue_lease
    );

    let consumer = WorkConsumer::new(
        queue,
        executor,
        config.max_parallel_pipelines,
        config.poll_interval,
    );

    if let Err(e) = consumer.run(shutdown_signal()).await {
        error!("Consumer error: {:#}", e);
        return Err(e);
    }

    info!("Runner stopped");
    Ok(())
}

/// Connect to Postgres with retry logic and exponential backoff
///
/// This handles the case where the database may not be ready yet when
/// the runner starts (common in container environments).
async fn connect_with_retry(config: &Config) -> Result<PgPool> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    // Every worker may hold a connection for receive and ack at once
    let max_connections = u32::try_from(config.max_parallel_pipelines)
        .unwrap_or(u32::MAX)
        .saturating_add(1);

    loop {
        attempt += 1;

        let result = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.database_url)
            .await;

        match result {
            Ok(pool) => {
                if attempt > 1 {
                    info!("Connected to database after {} attempt(s)", attempt);
                }
                return Ok(pool);
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Failed to connect to database after {} attempts", MAX_RETRIES);
                    return Err(anyhow::anyhow!("Failed to connect to database: {}", e));
                }

                warn!(
                    "Failed to connect to database (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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

    info!("Shutdown signal received, finishing in-flight pipelines");
}
