//! Container runtime boundary.
//!
//! The job state machine only talks to [`ContainerRuntime`]; the production
//! implementation shells out to the docker CLI ([`DockerCli`]).

pub mod docker;

use std::future::Future;
use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

pub use docker::DockerCli;

/// Captured result of one runtime invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Parameters of a single container run.
#[derive(Debug, Clone, Copy)]
pub struct RunSpec<'a> {
    pub image: &'a str,
    pub container: &'a str,
    pub remove_after_run: bool,
    /// Forwarded verbatim after the image name.
    pub args: &'a [String],
}

pub trait ContainerRuntime: Send + Sync + 'static {
    /// Names of host tools this runtime needs that are missing.
    fn missing_tools(&self) -> impl Future<Output = Vec<String>> + Send;

    /// Builds `image` from the manifest in `context_dir`. Each build argument
    /// is a `key=value` pair.
    fn build_image(
        &self,
        context_dir: &Path,
        image: &str,
        build_args: &[String],
    ) -> impl Future<Output = Result<CommandOutput, RuntimeError>> + Send;

    fn run_container(
        &self,
        spec: RunSpec<'_>,
    ) -> impl Future<Output = Result<CommandOutput, RuntimeError>> + Send;

    fn prune_system(&self) -> impl Future<Output = Result<CommandOutput, RuntimeError>> + Send;

    fn prune_images(&self) -> impl Future<Output = Result<CommandOutput, RuntimeError>> + Send;

    fn container_exists(
        &self,
        container: &str,
    ) -> impl Future<Output = Result<bool, RuntimeError>> + Send;

    fn remove_container(
        &self,
        container: &str,
    ) -> impl Future<Output = Result<CommandOutput, RuntimeError>> + Send;

    fn image_exists(&self, image: &str) -> impl Future<Output = Result<bool, RuntimeError>> + Send;

    fn remove_image(
        &self,
        image: &str,
    ) -> impl Future<Output = Result<CommandOutput, RuntimeError>> + Send;
}

/// Runs `program args...` to completion, capturing both streams.
pub(crate) async fn exec(program: &str, args: &[&str]) -> Result<CommandOutput, RuntimeError> {
    tracing::debug!(program, args = ?args, "Running command");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| RuntimeError::Spawn {
            program: program.to_string(),
            source,
        })?;
    Ok(CommandOutput::from(output))
}

/// Whether `program` can be spawned at all.
pub(crate) async fn tool_available(program: &str) -> bool {
    exec(program, &["--version"]).await.is_ok()
}
