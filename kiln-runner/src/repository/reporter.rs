//! State reporter repository
//!
//! Sends pipeline lifecycle events to the coordinator's RPC listener.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_client::CoordinatorClient;
use kiln_core::dto::report::{CommandOutput, PipelineFinished, PipelineStarted};

/// Repository trait for the reporter calls
///
/// Callers treat failures as non-fatal: they are logged, never retried.
#[async_trait]
pub trait StateReporter: Send + Sync {
    async fn started(&self, req: &PipelineStarted) -> Result<()>;

    async fn finished(&self, req: &PipelineFinished) -> Result<()>;

    async fn command_output(&self, req: &CommandOutput) -> Result<()>;
}

/// HTTP implementation of StateReporter
pub struct HttpStateReporter {
    client: CoordinatorClient,
}

impl HttpStateReporter {
    pub fn new(client: CoordinatorClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StateReporter for HttpStateReporter {
    async fn started(&self, req: &PipelineStarted) -> Result<()> {
        self.client
            .pipeline_started(req)
            .await
            .context("Failed to report pipeline start")
    }

    async fn finished(&self, req: &PipelineFinished) -> Result<()> {
        self.client
            .pipeline_finished(req)
            .await
            .context("Failed to report pipeline result")
    }

    async fn command_output(&self, req: &CommandOutput) -> Result<()> {
        self.client
            .command_output(req)
            .await
            .context("Failed to report command output")
    }
}
