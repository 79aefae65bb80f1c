//! Service Module
//!
//! Business logic layer for the coordinator.
//! Services orchestrate storage, queue and provider calls.

pub mod ingest;
pub mod pipeline;
pub mod reconcile;

// Re-export for convenience
pub use ingest as ingest_service;
pub use pipeline as pipeline_service;
pub use reconcile as reconcile_service;
