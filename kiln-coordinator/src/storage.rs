//! Storage contract
//!
//! The narrow interface the ingest and reconcile services persist through.
//! [`PgStorage`] implements it on top of the repository layer; tests use an
//! in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::domain::log::PipelineLog;
use kiln_core::domain::pipeline::{Pipeline, PipelineStatus};
use kiln_core::domain::work::OAuthToken;
use sqlx::PgPool;

use crate::repository::{log_repository, pipeline_repository, repo_repository};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Fields of a pipeline about to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPipeline {
    pub repo_id: i64,
    pub commit: String,
    pub clone_url: String,
    /// Pipeline URL up to (and excluding) the ID assigned at insert
    pub url_base: String,
}

/// Repo context needed to create and dispatch a pipeline
#[derive(Debug, Clone)]
pub struct CreationInfo {
    pub repo_id: i64,
    pub owner: String,
    pub repo_name: String,
    pub archived: bool,
    /// Credential of the service user the repo belongs to
    pub token: OAuthToken,
}

/// Context needed to publish a status change of an existing pipeline
#[derive(Debug, Clone)]
pub struct StateChangeInfo {
    pub commit: String,
    pub url: String,
    pub provider: String,
    pub owner: String,
    pub repo_name: String,
    pub token: OAuthToken,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Persists a new pending pipeline and assigns its ID and URL
    async fn create_pipeline(&self, new: NewPipeline) -> Result<Pipeline>;

    /// Removes a pipeline; returns whether it existed
    async fn delete_pipeline(&self, id: i64) -> Result<bool>;

    async fn get_pipeline(&self, id: i64) -> Result<Option<Pipeline>>;

    /// Looks up a repo by the provider's own repo identifier
    async fn get_pipeline_creation_info(
        &self,
        provider: &str,
        provider_repo_id: i64,
    ) -> Result<Option<CreationInfo>>;

    /// Moves a pending pipeline to running
    ///
    /// Returns `false` when the pipeline was not pending (duplicate or stale
    /// report); nothing is written in that case.
    async fn pipeline_started(&self, id: i64, started_at: DateTime<Utc>) -> Result<bool>;

    /// Moves a pending or running pipeline to a terminal status
    ///
    /// Returns `false` when the pipeline is already terminal.
    async fn pipeline_finished(
        &self,
        id: i64,
        status: PipelineStatus,
        finished_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn get_pipeline_state_change_info(&self, id: i64) -> Result<Option<StateChangeInfo>>;

    /// Appends one command log; returns `false` if that order was already stored
    async fn create_pipeline_log(&self, entry: &PipelineLog) -> Result<bool>;

    /// Command logs of a pipeline, ordered by `order`
    async fn list_pipeline_logs(&self, pipeline_id: i64) -> Result<Vec<PipelineLog>>;
}

/// Postgres implementation of [`Storage`]
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn create_pipeline(&self, new: NewPipeline) -> Result<Pipeline> {
        Ok(pipeline_repository::create(&self.pool, new).await?)
    }

    async fn delete_pipeline(&self, id: i64) -> Result<bool> {
        Ok(pipeline_repository::delete(&self.pool, id).await?)
    }

    async fn get_pipeline(&self, id: i64) -> Result<Option<Pipeline>> {
        pipeline_repository::find_by_id(&self.pool, id).await
    }

    async fn get_pipeline_creation_info(
        &self,
        provider: &str,
        provider_repo_id: i64,
    ) -> Result<Option<CreationInfo>> {
        Ok(repo_repository::find_creation_info(&self.pool, provider, provider_repo_id).await?)
    }

    async fn pipeline_started(&self, id: i64, started_at: DateTime<Utc>) -> Result<bool> {
        Ok(pipeline_repository::mark_started(&self.pool, id, started_at).await?)
    }

    async fn pipeline_finished(
        &self,
        id: i64,
        status: PipelineStatus,
        finished_at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(pipeline_repository::mark_finished(&self.pool, id, status, finished_at).await?)
    }

    async fn get_pipeline_state_change_info(&self, id: i64) -> Result<Option<StateChangeInfo>> {
        Ok(repo_repository::find_state_change_info(&self.pool, id).await?)
    }

    async fn create_pipeline_log(&self, entry: &PipelineLog) -> Result<bool> {
        Ok(log_repository::add_entry(&self.pool, entry).await?)
    }

    async fn list_pipeline_logs(&self, pipeline_id: i64) -> Result<Vec<PipelineLog>> {
        Ok(log_repository::find_by_pipeline(&self.pool, pipeline_id).await?)
    }
}
