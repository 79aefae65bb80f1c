//! Pipeline Repository
//!
//! Handles all database operations related to pipelines.
//! Status changes are targeted updates guarded by the allowed predecessor
//! states, so redelivered or out-of-order reports can never move a pipeline
//! backwards.

use chrono::{DateTime, Utc};
use kiln_core::domain::pipeline::{Pipeline, PipelineStatus};
use sqlx::PgPool;

use crate::storage::{NewPipeline, StorageError};

/// Create a new pending pipeline
///
/// The target URL depends on the ID, so insert and URL update share a
/// transaction.
pub async fn create(pool: &PgPool, new: NewPipeline) -> Result<Pipeline, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO pipelines (repo_id, status, commit_sha, clone_url, target_url)
        VALUES ($1, $2, $3, $4, '')
        RETURNING id
        "#,
    )
    .bind(new.repo_id)
    .bind(PipelineStatus::Pending.as_str())
    .bind(&new.commit)
    .bind(&new.clone_url)
    .fetch_one(&mut *tx)
    .await?;

    let url = format!("{}{}", new.url_base, id);

    sqlx::query("UPDATE pipelines SET target_url = $1 WHERE id = $2")
        .bind(&url)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Pipeline {
        id,
        status: PipelineStatus::Pending,
        commit: new.commit,
        clone_url: new.clone_url,
        url,
        started_at: None,
        finished_at: None,
        repo_id: new.repo_id,
    })
}

/// Find a pipeline by ID
pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Pipeline>, StorageError> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, repo_id, status, commit_sha, clone_url, target_url, started_at, finished_at
        FROM pipelines
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Pipeline::try_from).transpose()
}

/// Delete a pipeline by ID
pub async fn delete(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pipelines WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Transition pending -> running
pub async fn mark_started(
    pool: &PgPool,
    id: i64,
    started_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pipelines
        SET status = $1, started_at = $2
        WHERE id = $3 AND status = ANY($4)
        "#,
    )
    .bind(PipelineStatus::Running.as_str())
    .bind(started_at)
    .bind(id)
    .bind(predecessor_names(PipelineStatus::Running))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Transition pending/running -> success/error
pub async fn mark_finished(
    pool: &PgPool,
    id: i64,
    status: PipelineStatus,
    finished_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pipelines
        SET status = $1, finished_at = $2
        WHERE id = $3 AND status = ANY($4)
        "#,
    )
    .bind(status.as_str())
    .bind(finished_at)
    .bind(id)
    .bind(predecessor_names(status))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn predecessor_names(next: PipelineStatus) -> Vec<String> {
    PipelineStatus::predecessors(next)
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: i64,
    repo_id: i64,
    status: String,
    commit_sha: String,
    clone_url: String,
    target_url: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<PipelineRow> for Pipeline {
    type Error = StorageError;

    fn try_from(row: PipelineRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e| StorageError::Corrupt(format!("pipeline {}: {}", row.id, e)))?;

        Ok(Pipeline {
            id: row.id,
            status,
            commit: row.commit_sha,
            clone_url: row.clone_url,
            url: row.target_url,
            started_at: row.started_at,
            finished_at: row.finished_at,
            repo_id: row.repo_id,
        })
    }
}
