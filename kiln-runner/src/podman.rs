//! Podman container management
//!
//! Drives the podman CLI (or a CLI-compatible runtime) for the container
//! lifecycle of one pipeline run:
//! - Pulling the pipeline image
//! - Creating a container with the checkout mounted as workspace
//! - Executing commands with stdout and stderr merged
//! - Stopping and removing the container after the run
//!
//! Every child process is killed when its future is dropped, so a timed
//! out run does not leave a hung `podman exec` behind.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::container::{ContainerDriver, ContainerSpec, ExecOutput, WORKSPACE_MOUNT};

/// Seconds podman waits for the container to exit before killing it
const STOP_TIMEOUT_SECS: &str = "5";

#[derive(Debug, Clone)]
pub struct PodmanDriver {
    program: String,
}

impl PodmanDriver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Checks that the runtime is installed and answering
    pub async fn check_available(&self) -> Result<()> {
        let output = self
            .command()
            .arg("--version")
            .output()
            .await
            .with_context(|| {
                format!(
                    "Failed to execute '{} --version'. Is it installed?",
                    self.program
                )
            })?;

        if !output.status.success() {
            anyhow::bail!("{} is not working correctly", self.program);
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!("Container runtime is available: {}", version.trim());

        Ok(())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.kill_on_drop(true);
        command
    }

    /// Runs the runtime and fails on a non-zero exit
    async fn run(&self, action: &str, args: &[&str]) -> Result<String> {
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute {} {}", self.program, action))?;

        check_output(action, &output)?;

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn check_output(action: &str, output: &Output) -> Result<()> {
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !stderr.trim().is_empty() {
        debug!("{} stderr: {}", action, stderr.trim());
    }

    if !output.status.success() {
        anyhow::bail!(
            "{} failed: exit_code={}, stderr='{}'",
            action,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }

    Ok(())
}

/// Wraps a command line so stderr is merged into stdout inside the container
fn merged_output_script(cmd: &str) -> String {
    format!("exec 2>&1\n{}", cmd)
}

#[async_trait]
impl ContainerDriver for PodmanDriver {
    async fn pull(&self, image: &str) -> Result<()> {
        info!("Pulling image {}", image);
        self.run("pull", &["pull", "--quiet", "--", image]).await?;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let volume = format!("{}:{}", spec.workspace.display(), WORKSPACE_MOUNT);

        // Keep the container alive with a shell so commands can be exec'd;
        // the entrypoint override handles images with custom entrypoints
        let id = self
            .run(
                "create",
                &[
                    "create",
                    "--name",
                    &spec.name,
                    "--entrypoint",
                    "/bin/sh",
                    "-v",
                    &volume,
                    "-w",
                    WORKSPACE_MOUNT,
                    "--",
                    &spec.image,
                    "-c",
                    "sleep infinity",
                ],
            )
            .await?;

        debug!("Container {} created with ID: {}", spec.name, id);
        Ok(spec.name.clone())
    }

    async fn start(&self, container: &str) -> Result<()> {
        self.run("start", &["start", container]).await?;
        debug!("Container {} started", container);
        Ok(())
    }

    async fn exec(&self, container: &str, cmd: &str) -> Result<ExecOutput> {
        debug!("Executing in container {}: {}", container, cmd);

        let output = self
            .command()
            .args(["exec", "-w", WORKSPACE_MOUNT, container, "/bin/sh", "-c"])
            .arg(merged_output_script(cmd))
            .output()
            .await
            .context("Failed to execute podman exec command")?;

        // Anything on stderr here comes from the runtime, not the command
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!("exec stderr from runtime: {}", stderr.trim());
        }

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(
            "Command finished in container {}: exit_code={}, output_len={}",
            container,
            exit_code,
            output.stdout.len()
        );

        Ok(ExecOutput {
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
            exit_code,
        })
    }

    async fn stop(&self, container: &str) -> Result<()> {
        self.run("stop", &["stop", "--time", STOP_TIMEOUT_SECS, container])
            .await?;
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<()> {
        self.run("rm", &["rm", "--force", container]).await?;
        debug!("Container {} removed", container);
        Ok(())
    }
}
