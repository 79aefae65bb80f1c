//! Repository Module
//!
//! Data access layer for the coordinator.
//! Each repository handles database operations for a specific domain entity.

pub mod log;
pub mod pipeline;
pub mod repo;

// Re-export for convenience
pub use log as log_repository;
pub use pipeline as pipeline_repository;
pub use repo as repo_repository;
