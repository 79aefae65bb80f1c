//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One build attempt for a specific commit
///
/// Structure shared between coordinator (persists) and runner (executes).
/// The runner only ever sees the snapshot embedded in a [`Work`](super::work::Work).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Numeric ID, assigned at persistence
    pub id: i64,
    pub status: PipelineStatus,
    /// Commit SHA the pipeline builds
    pub commit: String,
    pub clone_url: String,
    /// Externally reachable URL for this pipeline (commit status target)
    pub url: String,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Owning repo reference
    pub repo_id: i64,
}

/// Pipeline status
///
/// Status only moves forward: pending -> running -> {success, error}.
/// A pending pipeline may jump straight to a terminal state when the
/// `Finished` report overtakes `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Success => "success",
            PipelineStatus::Error => "error",
        }
    }

    /// Terminal states are immutable
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Success | PipelineStatus::Error)
    }

    /// Whether moving from `self` to `next` is a forward transition
    pub fn can_advance_to(&self, next: PipelineStatus) -> bool {
        match (self, next) {
            (PipelineStatus::Pending, PipelineStatus::Running) => true,
            (PipelineStatus::Pending | PipelineStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// States from which `next` may be entered
    ///
    /// Used to build targeted `UPDATE ... WHERE status IN (...)` writes.
    pub fn predecessors(next: PipelineStatus) -> &'static [PipelineStatus] {
        match next {
            PipelineStatus::Pending => &[],
            PipelineStatus::Running => &[PipelineStatus::Pending],
            PipelineStatus::Success | PipelineStatus::Error => {
                &[PipelineStatus::Pending, PipelineStatus::Running]
            }
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored status string is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pipeline status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for PipelineStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PipelineStatus::Pending),
            "running" => Ok(PipelineStatus::Running),
            "success" => Ok(PipelineStatus::Success),
            "error" => Ok(PipelineStatus::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Final result of one pipeline run as seen by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// The terminal pipeline status this outcome maps to
    pub fn status(&self) -> PipelineStatus {
        match self {
            Outcome::Success => PipelineStatus::Success,
            Outcome::Failure => PipelineStatus::Error,
        }
    }
}

/// Why a run failed
///
/// Travels with the `Finished` report so the coordinator can pick a
/// human-readable commit status description without exposing raw errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Git auth, network or missing ref
    FetchError,
    /// Missing or invalid pipeline definition file
    ConfigError,
    /// Image pull or container creation failed
    ProvisionError,
    /// A command exited non-zero
    ExecutionError,
    /// The run exceeded the runner's pipeline timeout
    TimeoutError,
    InternalError,
}

impl FailureCategory {
    /// Short description safe to publish on a commit status
    pub fn description(&self) -> &'static str {
        match self {
            FailureCategory::FetchError => "Could not fetch the commit",
            FailureCategory::ConfigError => "Pipeline definition is missing or invalid",
            FailureCategory::ProvisionError => "Could not start the build container",
            FailureCategory::ExecutionError => "A pipeline command failed",
            FailureCategory::TimeoutError => "Pipeline timed out",
            FailureCategory::InternalError => "Pipeline errored",
        }
    }
}
