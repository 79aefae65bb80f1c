//! API Module
//!
//! HTTP API layer for the coordinator.
//! The public router serves webhooks and pipeline lookups; the RPC router
//! serves the runners' reporter calls on its own listener.

pub mod error;
pub mod health;
pub mod pipeline;
pub mod rpc;
pub mod webhook;

use axum::{
    Router,
    routing::{get, post},
};
use kiln_core::dto::report::{FINISHED_PATH, OUTPUT_PATH, STARTED_PATH};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the public router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Event ingestion
        .route("/hooks/{provider}", post(webhook::receive_webhook))
        // Pipeline endpoints
        .route("/pipelines/{id}", get(pipeline::get_pipeline))
        .route("/pipelines/{id}/log", get(pipeline::download_log))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Create the reporter RPC router
pub fn create_rpc_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(STARTED_PATH, post(rpc::pipeline_started))
        .route(FINISHED_PATH, post(rpc::pipeline_finished))
        .route(OUTPUT_PATH, post(rpc::command_output))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
