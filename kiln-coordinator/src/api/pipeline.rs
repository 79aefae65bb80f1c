//! Pipeline API Handlers
//!
//! Read-only pipeline lookups and transcript downloads.

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use kiln_core::dto::pipeline::PipelineDetails;
use tokio_util::io::ReaderStream;

use crate::api::error::ApiResult;
use crate::service::pipeline_service;
use crate::state::AppState;

/// GET /pipelines/{id}
/// Get a pipeline with its command logs
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<PipelineDetails>> {
    tracing::debug!("Getting pipeline: {}", id);

    let details = pipeline_service::get_pipeline(&state, id).await?;
    Ok(Json(details))
}

/// GET /pipelines/{id}/log
/// Stream the stored transcript of a pipeline
pub async fn download_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    tracing::debug!("Downloading log of pipeline: {}", id);

    let reader = pipeline_service::open_log(&state, id).await?;
    let body = Body::from_stream(ReaderStream::new(reader));

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    ))
}
