//! Event Ingestor
//!
//! Turns a verified push delivery into a pending pipeline and one queued
//! work item. Repo and credential are resolved before anything is written,
//! and a failed enqueue deletes the pipeline again, so a persisted pipeline
//! always has work dispatched for it.

use axum::http::HeaderMap;
use kiln_core::domain::pipeline::{Pipeline, PipelineStatus};
use kiln_core::domain::work::Work;
use kiln_queue::QueueError;

use crate::provider::{CommitStatus, PushEvent, WebhookEvent};
use crate::state::AppState;
use crate::storage::{NewPipeline, StorageError};

/// What a delivery resulted in
#[derive(Debug)]
pub enum IngestOutcome {
    /// Hook verification; nothing was created
    Ping,
    /// A supported event with nothing to build
    Ignored(String),
    Created(Pipeline),
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("event not implemented: {0}")]
    Unsupported(String),

    #[error("repo {0} is not registered")]
    UnknownRepo(i64),

    #[error("repo {0} is archived")]
    ArchivedRepo(i64),

    /// The work item could not be queued; the pipeline was removed again
    #[error("failed to dispatch pipeline: {0}")]
    Dispatch(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Handle one webhook delivery addressed to `provider_name`
pub async fn ingest(
    state: &AppState,
    provider_name: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<IngestOutcome> {
    let provider = state
        .providers
        .get(provider_name)
        .ok_or_else(|| IngestError::UnknownProvider(provider_name.to_string()))?;

    if !provider.verify_signature(headers, body, &state.config.webhook_secret) {
        tracing::warn!(provider = provider_name, "Rejected webhook with invalid signature");
        return Err(IngestError::InvalidSignature);
    }

    let event = provider
        .parse_event(headers, body)
        .map_err(|e| IngestError::InvalidPayload(e.to_string()))?;

    match event {
        WebhookEvent::Ping => {
            tracing::info!(provider = provider_name, "Webhook ping received");
            Ok(IngestOutcome::Ping)
        }
        WebhookEvent::Ignored(reason) => {
            tracing::debug!(provider = provider_name, "Ignoring webhook: {}", reason);
            Ok(IngestOutcome::Ignored(reason))
        }
        WebhookEvent::Unsupported(event) => Err(IngestError::Unsupported(event)),
        WebhookEvent::Push(push) => create_and_dispatch(state, provider_name, push).await,
    }
}

async fn create_and_dispatch(
    state: &AppState,
    provider_name: &str,
    push: PushEvent,
) -> Result<IngestOutcome> {
    let info = state
        .storage
        .get_pipeline_creation_info(provider_name, push.provider_repo_id)
        .await?
        .ok_or(IngestError::UnknownRepo(push.provider_repo_id))?;

    if info.archived {
        return Err(IngestError::ArchivedRepo(push.provider_repo_id));
    }

    let pipeline = state
        .storage
        .create_pipeline(NewPipeline {
            repo_id: info.repo_id,
            commit: push.commit,
            clone_url: push.clone_url,
            url_base: state.pipeline_url_base(),
        })
        .await?;

    tracing::info!(
        pipeline_id = pipeline.id,
        repo = %format!("{}/{}", info.owner, info.repo_name),
        commit = %pipeline.commit,
        git_ref = %push.git_ref,
        "Pipeline created"
    );

    let work = Work {
        pipeline: pipeline.clone(),
        token: info.token.clone(),
    };

    if let Err(e) = state.queue.send(&work).await {
        tracing::error!(pipeline_id = pipeline.id, "Failed to enqueue work: {}", e);

        // Compensate so no pending pipeline is left without work
        if let Err(delete_err) = state.storage.delete_pipeline(pipeline.id).await {
            tracing::error!(
                pipeline_id = pipeline.id,
                "Failed to delete undispatched pipeline: {}",
                delete_err
            );
        }

        return Err(IngestError::Dispatch(e));
    }

    tracing::debug!(pipeline_id = pipeline.id, "Work enqueued");

    // The pipeline is dispatched at this point; a status failure is not fatal
    if let Some(provider) = state.providers.get(provider_name) {
        let status = CommitStatus {
            owner: info.owner,
            repo: info.repo_name,
            commit: pipeline.commit.clone(),
            status: PipelineStatus::Pending,
            target_url: pipeline.url.clone(),
            context: state.config.status_context.clone(),
            description: "Pipeline is queued".to_string(),
        };

        if let Err(e) = provider.create_commit_status(&info.token, &status).await {
            tracing::warn!(
                pipeline_id = pipeline.id,
                "Failed to post pending status: {}",
                e
            );
        }
    }

    Ok(IngestOutcome::Created(pipeline))
}
