//! Container driver contract
//!
//! The executor drives one container per run through this trait: pull,
//! create, start, a sequence of execs, then stop and remove.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// Working directory of every command inside the container
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// What to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Host directory mounted at [`WORKSPACE_MOUNT`]
    pub workspace: PathBuf,
}

/// Result of one exec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Combined stdout and stderr, in the order the command wrote them
    pub output: String,
    pub exit_code: i32,
}

#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn pull(&self, image: &str) -> Result<()>;

    /// Creates a stopped container; returns its name
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, container: &str) -> Result<()>;

    /// Runs a shell command line in a started container
    ///
    /// A non-zero exit is reported through [`ExecOutput::exit_code`]; an
    /// `Err` means the command could not be run at all.
    async fn exec(&self, container: &str, cmd: &str) -> Result<ExecOutput>;

    async fn stop(&self, container: &str) -> Result<()>;

    async fn remove(&self, container: &str) -> Result<()>;
}
