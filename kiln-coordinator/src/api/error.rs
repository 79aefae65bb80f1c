//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::ingest_service::IngestError;
use crate::service::pipeline_service::PipelineError;
use crate::service::reconcile_service::ReconcileError;
use crate::storage::StorageError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Unprocessable(String),
    NotImplemented(String),
    ServiceUnavailable(String),
    StorageError(StorageError),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
            ApiError::ServiceUnavailable(msg) => {
                tracing::error!("Service unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable".to_string(),
                )
            }
            ApiError::StorageError(err) => {
                tracing::error!("Storage error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::StorageError(err)
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::UnknownProvider(_) | IngestError::UnknownRepo(_) => {
                ApiError::NotFound(err.to_string())
            }
            IngestError::InvalidSignature => ApiError::Unauthorized(err.to_string()),
            IngestError::InvalidPayload(_) => ApiError::BadRequest(err.to_string()),
            IngestError::Unsupported(_) => ApiError::NotImplemented(err.to_string()),
            IngestError::ArchivedRepo(_) => ApiError::Unprocessable(err.to_string()),
            IngestError::Dispatch(_) => ApiError::ServiceUnavailable(err.to_string()),
            IngestError::Storage(err) => ApiError::StorageError(err),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::PipelineNotFound(_) => ApiError::NotFound(err.to_string()),
            ReconcileError::Storage(err) => ApiError::StorageError(err),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(_) | PipelineError::LogNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            PipelineError::Storage(err) => ApiError::StorageError(err),
            PipelineError::Blob(err) => ApiError::InternalError(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
