//! Pipeline Executor
//!
//! Runs one work item: fetch the commit, parse the pipeline definition,
//! provision a container, run every command fail-fast, then tear down,
//! upload the transcript and report the outcome.
//!
//! Failures of a run never escape [`PipelineExecutor::execute`]; they are
//! classified into a [`FailureCategory`] and reported with `Finished`.
//! Reporter failures are logged and do not affect the run. The container
//! and the checkout directory are removed on every path, including timeout.

use async_trait::async_trait;
use chrono::Utc;
use kiln_blob::BlobStore;
use kiln_core::definition::{
    DEFINITION_FILE, MAX_DEFINITION_BYTES, PipelineDefinition, parse_definition,
};
use kiln_core::domain::pipeline::{FailureCategory, Outcome};
use kiln_core::domain::work::Work;
use kiln_core::dto::report::{CommandOutput, FailureSummary, PipelineFinished, PipelineStarted};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::container::{ContainerDriver, ContainerSpec};
use crate::git::Fetcher;
use crate::repository::StateReporter;
use crate::service::ExecutionService;
use crate::service::transcript::Transcript;

/// Why a run failed
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("credential expired before the run started")]
    TokenExpired,

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error(".kiln.yml not found in repository")]
    DefinitionMissing,

    #[error("invalid .kiln.yml: {0}")]
    Definition(String),

    #[error("provisioning failed: {0}")]
    Provision(String),

    #[error("command {order} `{cmd}` exited with code {exit_code}")]
    CommandFailed {
        order: i32,
        cmd: String,
        exit_code: i32,
    },

    #[error("command {order} could not be run: {message}")]
    Exec { order: i32, message: String },

    #[error("pipeline timed out after {0:?}")]
    Timeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RunError {
    pub fn category(&self) -> FailureCategory {
        match self {
            RunError::TokenExpired | RunError::Fetch(_) => FailureCategory::FetchError,
            RunError::DefinitionMissing | RunError::Definition(_) => FailureCategory::ConfigError,
            RunError::Provision(_) => FailureCategory::ProvisionError,
            RunError::CommandFailed { .. } | RunError::Exec { .. } => {
                FailureCategory::ExecutionError
            }
            RunError::Timeout(_) => FailureCategory::TimeoutError,
            RunError::Internal(_) => FailureCategory::InternalError,
        }
    }
}

/// Outcome of one run, as reported with `Finished`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: Outcome,
    pub error: Option<FailureSummary>,
}

impl From<&Result<(), RunError>> for RunSummary {
    fn from(result: &Result<(), RunError>) -> Self {
        match result {
            Ok(()) => RunSummary {
                outcome: Outcome::Success,
                error: None,
            },
            Err(e) => RunSummary {
                outcome: Outcome::Failure,
                error: Some(FailureSummary {
                    category: e.category(),
                    message: e.to_string(),
                }),
            },
        }
    }
}

pub struct PipelineExecutor {
    runner_id: String,
    fetcher: Arc<dyn Fetcher>,
    driver: Arc<dyn ContainerDriver>,
    blobs: Arc<dyn BlobStore>,
    reporter: Arc<dyn StateReporter>,
    workspace_dir: PathBuf,
    timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(
        runner_id: String,
        fetcher: Arc<dyn Fetcher>,
        driver: Arc<dyn ContainerDriver>,
        blobs: Arc<dyn BlobStore>,
        reporter: Arc<dyn StateReporter>,
        workspace_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            runner_id,
            fetcher,
            driver,
            blobs,
            reporter,
            workspace_dir,
            timeout,
        }
    }

    /// Runs inside a fresh checkout directory, removed afterwards
    async fn run_in_checkout(&self, work: &Work, transcript: &mut Transcript) -> Result<(), RunError> {
        let id = work.pipeline.id;

        let checkout = tempfile::Builder::new()
            .prefix(&format!("kiln-{}-", id))
            .tempdir_in(&self.workspace_dir)
            .map_err(|e| RunError::Internal(format!("failed to create checkout directory: {}", e)))?;

        let mut container = None;
        let run = self.run(work, checkout.path(), transcript, &mut container);

        let result = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(RunError::Timeout(self.timeout)),
        };

        if let Some(container) = container {
            self.teardown(id, &container).await;
        }

        let path = checkout.path().to_path_buf();
        if let Err(e) = checkout.close() {
            warn!(pipeline_id = id, "Failed to remove {}: {}", path.display(), e);
        }

        result
    }

    /// Fetch, parse, provision and execute
    ///
    /// `container` is set before a container may exist so the caller can
    /// tear it down even when this future is dropped on timeout.
    async fn run(
        &self,
        work: &Work,
        checkout: &Path,
        transcript: &mut Transcript,
        container: &mut Option<String>,
    ) -> Result<(), RunError> {
        let pipeline = &work.pipeline;

        if work.token.is_expired_at(Utc::now()) {
            return Err(RunError::TokenExpired);
        }

        self.fetcher
            .fetch(&pipeline.clone_url, &pipeline.commit, &work.token, checkout)
            .await
            .map_err(|e| RunError::Fetch(format!("{:#}", e)))?;

        let definition = load_definition(checkout).await?;
        debug!(
            pipeline_id = pipeline.id,
            "Loaded pipeline '{}' ({} job(s), image {})",
            definition.name,
            definition.jobs.len(),
            definition.image
        );

        let provision = |e: anyhow::Error| RunError::Provision(format!("{:#}", e));

        self.driver.pull(&definition.image).await.map_err(provision)?;

        let spec = ContainerSpec {
            name: format!("kiln-{}-{}", pipeline.id, Uuid::new_v4().simple()),
            image: definition.image.clone(),
            workspace: checkout.to_path_buf(),
        };
        // Recorded before creation: a timeout can drop this future after the
        // runtime created the container but before `create` returned
        *container = Some(spec.name.clone());
        let name = self.driver.create(&spec).await.map_err(provision)?;
        *container = Some(name.clone());

        self.driver.start(&name).await.map_err(provision)?;

        for (index, cmd) in definition.commands().enumerate() {
            let order = i32::try_from(index)
                .map_err(|_| RunError::Internal("too many commands".to_string()))?;

            let result = self
                .driver
                .exec(&name, cmd)
                .await
                .map_err(|e| RunError::Exec {
                    order,
                    message: format!("{:#}", e),
                })?;

            transcript.append(&result.output);

            let report = CommandOutput {
                pipeline_id: pipeline.id,
                order,
                cmd: cmd.to_string(),
                output: result.output,
                exit_code: result.exit_code,
            };
            if let Err(e) = self.reporter.command_output(&report).await {
                warn!(pipeline_id = pipeline.id, order, "{:#}", e);
            }

            if result.exit_code != 0 {
                return Err(RunError::CommandFailed {
                    order,
                    cmd: cmd.to_string(),
                    exit_code: result.exit_code,
                });
            }
        }

        Ok(())
    }

    /// Stop and remove; failures are logged only
    async fn teardown(&self, id: i64, container: &str) {
        if let Err(e) = self.driver.stop(container).await {
            warn!(pipeline_id = id, "Failed to stop container {}: {:#}", container, e);
        }

        match self.driver.remove(container).await {
            Ok(()) => debug!(pipeline_id = id, "Container {} removed", container),
            Err(e) => warn!(
                pipeline_id = id,
                "Failed to remove container {}: {:#}",
                container,
                e
            ),
        }
    }

    async fn upload_transcript(&self, id: i64, transcript: &Transcript) {
        let result = self
            .blobs
            .upload_log(id, &mut transcript.as_bytes(), transcript.len())
            .await;

        match result {
            Ok(()) => debug!(pipeline_id = id, "Uploaded {} byte transcript", transcript.len()),
            Err(e) => warn!(pipeline_id = id, "Failed to upload transcript: {}", e),
        }
    }
}

#[async_trait]
impl ExecutionService for PipelineExecutor {
    async fn execute(&self, work: &Work) -> RunSummary {
        let id = work.pipeline.id;

        info!(
            pipeline_id = id,
            runner_id = %self.runner_id,
            commit = %work.pipeline.commit,
            "Starting pipeline run"
        );

        let started = PipelineStarted {
            pipeline_id: id,
            started_at: Utc::now(),
        };
        if let Err(e) = self.reporter.started(&started).await {
            warn!(pipeline_id = id, "{:#}", e);
        }

        let mut transcript = Transcript::new();
        let result = self.run_in_checkout(work, &mut transcript).await;

        self.upload_transcript(id, &transcript).await;

        let summary = RunSummary::from(&result);
        match &result {
            Ok(()) => info!(pipeline_id = id, "Pipeline succeeded"),
            Err(e) => info!(
                pipeline_id = id,
                category = ?e.category(),
                "Pipeline failed: {}",
                e
            ),
        }

        let finished = PipelineFinished {
            pipeline_id: id,
            finished_at: Utc::now(),
            outcome: summary.outcome,
            error: summary.error.clone(),
        };
        if let Err(e) = self.reporter.finished(&finished).await {
            warn!(pipeline_id = id, "{:#}", e);
        }

        summary
    }
}

async fn load_definition(checkout: &Path) -> Result<PipelineDefinition, RunError> {
    let path = checkout.join(DEFINITION_FILE);

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RunError::DefinitionMissing);
        }
        Err(e) => return Err(RunError::Definition(e.to_string())),
    };

    if metadata.len() > MAX_DEFINITION_BYTES {
        return Err(RunError::Definition(format!(
            "file exceeds {} bytes",
            MAX_DEFINITION_BYTES
        )));
    }

    let source = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| RunError::Definition(e.to_string()))?;

    parse_definition(&source).map_err(|e| RunError::Definition(e.to_string()))
}
