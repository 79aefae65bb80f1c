//! Status Reconciler
//!
//! Applies the runners' reporter calls to persisted pipeline state and
//! mirrors status changes to the provider.
//!
//! Every call is keyed on the pipeline ID and only ever moves status forward.
//! A call that would not advance the pipeline (duplicate, stale, or arriving
//! after a terminal report) is acknowledged without side effects, which makes
//! redelivered runs harmless.

use kiln_core::domain::pipeline::{Outcome, PipelineStatus};
use kiln_core::dto::report::{CommandOutput, PipelineFinished, PipelineStarted};

use crate::provider::CommitStatus;
use crate::state::AppState;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("pipeline {0} not found")]
    PipelineNotFound(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// `PipelineStarted`: pending -> running
pub async fn pipeline_started(state: &AppState, req: PipelineStarted) -> Result<()> {
    let id = req.pipeline_id;

    if !state.storage.pipeline_started(id, req.started_at).await? {
        return skip_transition(state, id, PipelineStatus::Running).await;
    }

    tracing::info!(pipeline_id = id, "Pipeline started");

    publish_status(state, id, PipelineStatus::Running, "Pipeline is running").await
}

/// `PipelineFinished`: pending/running -> success/error
pub async fn pipeline_finished(state: &AppState, req: PipelineFinished) -> Result<()> {
    let id = req.pipeline_id;
    let status = req.outcome.status();

    if !state.storage.pipeline_finished(id, status, req.finished_at).await? {
        return skip_transition(state, id, status).await;
    }

    match &req.error {
        Some(error) => tracing::info!(
            pipeline_id = id,
            category = ?error.category,
            "Pipeline failed: {}",
            error.message
        ),
        None => tracing::info!(pipeline_id = id, "Pipeline finished: {}", status),
    }

    // Raw error text stays in the logs; the provider only sees the category
    let description = match (req.outcome, &req.error) {
        (Outcome::Success, _) => "Pipeline succeeded",
        (Outcome::Failure, Some(error)) => error.category.description(),
        (Outcome::Failure, None) => "Pipeline failed",
    };

    publish_status(state, id, status, description).await
}

/// `CommandOutput`: append one log entry; status is untouched
pub async fn command_output(state: &AppState, req: CommandOutput) -> Result<()> {
    let id = req.pipeline_id;

    if state.storage.get_pipeline(id).await?.is_none() {
        return Err(ReconcileError::PipelineNotFound(id));
    }

    let order = req.order;
    if !state.storage.create_pipeline_log(&req.into()).await? {
        tracing::debug!(pipeline_id = id, order, "Duplicate command output ignored");
    }

    Ok(())
}

/// Distinguishes a no-op report from one about an unknown pipeline
async fn skip_transition(state: &AppState, id: i64, next: PipelineStatus) -> Result<()> {
    let pipeline = state
        .storage
        .get_pipeline(id)
        .await?
        .ok_or(ReconcileError::PipelineNotFound(id))?;

    tracing::debug!(
        pipeline_id = id,
        current = %pipeline.status,
        requested = %next,
        "Ignoring report that does not advance the pipeline"
    );

    Ok(())
}

/// Posts the commit status for a transition that was just persisted
///
/// Provider failures are logged and swallowed; failing to load the pipeline's
/// repo context is an error.
async fn publish_status(
    state: &AppState,
    id: i64,
    status: PipelineStatus,
    description: &str,
) -> Result<()> {
    let info = state
        .storage
        .get_pipeline_state_change_info(id)
        .await?
        .ok_or(ReconcileError::PipelineNotFound(id))?;

    let Some(provider) = state.providers.get(&info.provider) else {
        tracing::warn!(
            pipeline_id = id,
            provider = %info.provider,
            "No provider registered, commit status not posted"
        );
        return Ok(());
    };

    let commit_status = CommitStatus {
        owner: info.owner,
        repo: info.repo_name,
        commit: info.commit,
        status,
        target_url: info.url,
        context: state.config.status_context.clone(),
        description: description.to_string(),
    };

    if let Err(e) = provider
        .create_commit_status(&info.token, &commit_status)
        .await
    {
        tracing::warn!(
            pipeline_id = id,
            state = provider.status_state(status),
            "Failed to post commit status: {}",
            e
        );
    }

    Ok(())
}
