//! Service layer
//!
//! Services contain business logic for the runner. They orchestrate the
//! fetcher, container driver, blob store and reporter to execute one
//! pipeline run.
//!
//! All services are trait-based to enable testing and dependency injection.

mod executor;
mod transcript;

use async_trait::async_trait;
use kiln_core::domain::work::Work;

// Re-export implementations
pub use executor::{PipelineExecutor, RunSummary};

/// Service trait for running one work item to completion
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes a work item end to end
    ///
    /// Never fails: run failures are classified into the summary and
    /// reported to the coordinator before this returns.
    async fn execute(&self, work: &Work) -> RunSummary;
}
