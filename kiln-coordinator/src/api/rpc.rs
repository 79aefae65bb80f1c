//! Reporter RPC Handlers
//!
//! Server side of the runner's reporter calls. Each call is answered with
//! `204 No Content` or an error.

use axum::{Json, extract::State, http::StatusCode};
use kiln_core::dto::report::{CommandOutput, PipelineFinished, PipelineStarted};

use crate::api::error::ApiResult;
use crate::service::reconcile_service;
use crate::state::AppState;

/// POST /rpc/pipeline/started
pub async fn pipeline_started(
    State(state): State<AppState>,
    Json(req): Json<PipelineStarted>,
) -> ApiResult<StatusCode> {
    reconcile_service::pipeline_started(&state, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /rpc/pipeline/finished
pub async fn pipeline_finished(
    State(state): State<AppState>,
    Json(req): Json<PipelineFinished>,
) -> ApiResult<StatusCode> {
    reconcile_service::pipeline_finished(&state, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /rpc/pipeline/output
pub async fn command_output(
    State(state): State<AppState>,
    Json(req): Json<CommandOutput>,
) -> ApiResult<StatusCode> {
    tracing::debug!(
        pipeline_id = req.pipeline_id,
        order = req.order,
        exit_code = req.exit_code,
        "Command output received"
    );

    reconcile_service::command_output(&state, req).await?;
    Ok(StatusCode::NO_CONTENT)
}
