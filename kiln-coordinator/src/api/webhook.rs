//! Webhook API Handler
//!
//! Entry point of the Event Ingestor.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::{Value, json};

use crate::api::error::ApiResult;
use crate::service::ingest_service::{self, IngestOutcome};
use crate::state::AppState;

/// POST /hooks/{provider}
/// Receive a webhook delivery
///
/// - 201 Created: pipeline persisted and dispatched
/// - 200 OK: ping acknowledged
/// - 202 Accepted: event understood, nothing to build
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    tracing::debug!(provider = %provider, "Received webhook");

    let response = match ingest_service::ingest(&state, &provider, &headers, &body).await? {
        IngestOutcome::Ping => (StatusCode::OK, Json(json!({ "message": "pong" }))),
        IngestOutcome::Ignored(reason) => {
            (StatusCode::ACCEPTED, Json(json!({ "message": reason })))
        }
        IngestOutcome::Created(pipeline) => (
            StatusCode::CREATED,
            Json(json!({ "id": pipeline.id, "url": pipeline.url })),
        ),
    };

    Ok(response)
}
