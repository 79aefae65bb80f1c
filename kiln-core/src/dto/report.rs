//! Reporter DTOs
//!
//! Bodies of the three unary calls the runner makes against the coordinator.
//! All of them are keyed on the pipeline ID and answered with an empty
//! acknowledgement or an error.

use serde::{Deserialize, Serialize};

use crate::domain::log::{PipelineLog, strip_nul};
use crate::domain::pipeline::{FailureCategory, Outcome};

/// Route of the `PipelineStarted` call on the coordinator's RPC listener
pub const STARTED_PATH: &str = "/rpc/pipeline/started";
/// Route of the `PipelineFinished` call
pub const FINISHED_PATH: &str = "/rpc/pipeline/finished";
/// Route of the `CommandOutput` call
pub const OUTPUT_PATH: &str = "/rpc/pipeline/output";

/// `PipelineStarted(pipelineID, startedAt)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStarted {
    pub pipeline_id: i64,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// `PipelineFinished(pipelineID, finishedAt, outcome, optional error)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFinished {
    pub pipeline_id: i64,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureSummary>,
}

/// Classified error attached to a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub category: FailureCategory,
    pub message: String,
}

/// `CommandOutput(pipelineID, order, cmd, output, exitCode)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub pipeline_id: i64,
    pub order: i32,
    pub cmd: String,
    pub output: String,
    pub exit_code: i32,
}

impl From<CommandOutput> for PipelineLog {
    fn from(req: CommandOutput) -> Self {
        PipelineLog {
            pipeline_id: req.pipeline_id,
            order: req.order,
            cmd: strip_nul(req.cmd),
            output: strip_nul(req.output),
            exit_code: req.exit_code,
        }
    }
}
