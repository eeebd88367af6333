use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use futures::FutureExt;
use regex_lite::Regex;

use super::context::{CapabilityProfile, ExecutionContext, MANIFEST_FILE, Phase};
use super::outcome::{ExecutionOutcome, interpret_run};
use crate::config::NodeConfig;
use crate::error::{ExecutionError, FailureKind};
use crate::fetch::{ArchiveFormat, PackageFetcher};
use crate::ledger::{JobDescriptor, RetrievalProtocol};
use crate::runtime::{CommandOutput, ContainerRuntime, RunSpec, RuntimeError};
use crate::store::ResultStore;

/// Letters, digits, `-` and `_` on both sides of a single `=`.
static BUILD_ARG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+=[A-Za-z0-9_-]+$").expect("build arg regex is valid")
});

/// Runs one job attempt from preflight to cleanup.
pub struct Execution<R, F> {
    context: ExecutionContext,
    config: Arc<NodeConfig>,
    runtime: Arc<R>,
    fetcher: Arc<F>,
    store: Arc<ResultStore>,
}

impl<R, F> Execution<R, F>
where
    R: ContainerRuntime,
    F: PackageFetcher,
{
    pub fn new(
        config: Arc<NodeConfig>,
        profile: CapabilityProfile,
        job: JobDescriptor,
        runtime: Arc<R>,
        fetcher: Arc<F>,
        store: Arc<ResultStore>,
    ) -> Self {
        let context = ExecutionContext::new(&config, profile, job);
        Self {
            context,
            config,
            runtime,
            fetcher,
            store,
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn job_id(&self) -> &str {
        self.context.job_id()
    }

    /// Advances the phase and pushes the new snapshot to the store.
    pub fn advance(&mut self, phase: Phase) {
        if self.context.advance(phase) {
            tracing::debug!(job_id = %self.context.job.id, phase = %phase, "Phase changed");
            self.sync();
        }
    }

    pub fn record_should_post_answer(&mut self, should_post: bool) {
        self.context.set_should_post_answer(should_post);
        self.sync();
    }

    fn record_outcome(&mut self, outcome: ExecutionOutcome) {
        if self.context.set_outcome(outcome) {
            self.sync();
        }
    }

    fn sync(&self) {
        self.store.update(self.context.job_id(), self.context.clone());
    }

    /// Runs the job and returns its outcome.
    ///
    /// Only a capability rejection comes back as `Err`; every other failure,
    /// panics included, is folded into the returned outcome. Cleanup runs
    /// whenever download was attempted.
    pub async fn execute(&mut self) -> Result<ExecutionOutcome, ExecutionError> {
        self.advance(Phase::Preflight);
        if let Err(err) = self.preflight() {
            tracing::warn!(job_id = %self.context.job.id, error = %err, "Rejecting job");
            self.record_outcome(ExecutionOutcome::from(&err));
            return Err(err);
        }

        if !self.context.is_elected() {
            let outcome = ExecutionOutcome::failure(
                FailureKind::NotElected,
                format!(
                    "Node {} is not elected to run job {}",
                    self.context.node_id, self.context.job.id
                ),
            );
            tracing::info!(job_id = %self.context.job.id, "Node not elected, skipping job");
            self.record_outcome(outcome.clone());
            return Ok(outcome);
        }

        if let Err(err) = self.validate_build_args() {
            tracing::warn!(job_id = %self.context.job.id, error = %err, "Invalid build arguments");
            let outcome = ExecutionOutcome::from(&err);
            self.record_outcome(outcome.clone());
            return Ok(outcome);
        }

        let started = std::time::Instant::now();
        let outcome = self.run_guarded().await;
        self.advance(Phase::Finished);
        tracing::info!(
            job_id = %self.context.job.id,
            success = outcome.is_success(),
            error = ?outcome.error,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        );
        Ok(outcome)
    }

    fn preflight(&self) -> Result<(), ExecutionError> {
        let job = &self.context.job;
        let profile = &self.context.profile;
        if job.gpu_required && !profile.allow_gpu {
            return Err(ExecutionError::Rejected(
                "GPU required but not allowed by node config".into(),
            ));
        }
        if job.network_required && !profile.allow_network {
            return Err(ExecutionError::Rejected(
                "Network required but not allowed by node config".into(),
            ));
        }
        Ok(())
    }

    fn validate_build_args(&self) -> Result<(), ExecutionError> {
        for arg in self.context.job.build_args.iter().flatten() {
            if !BUILD_ARG_REGEX.is_match(arg) {
                return Err(ExecutionError::Preflight(format!(
                    "Received malformed build arg: {arg}. Build args must be of the form <key>=<value>"
                )));
            }
        }
        Ok(())
    }

    async fn run_guarded(&mut self) -> ExecutionOutcome {
        let result = AssertUnwindSafe(self.run_phases()).catch_unwind().await;
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                tracing::error!(
                    job_id = %self.context.job.id,
                    kind = %err.kind(),
                    error = %err,
                    "Job failed"
                );
                ExecutionOutcome::from(&err)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(job_id = %self.context.job.id, %message, "Job panicked");
                ExecutionOutcome::failure(FailureKind::Internal, format!("panic: {message}"))
            }
        };
        self.record_outcome(outcome.clone());
        self.cleanup().await;
        outcome
    }

    async fn run_phases(&mut self) -> Result<ExecutionOutcome, ExecutionError> {
        self.download().await?;
        self.extract().await?;
        self.build().await?;
        self.run().await
    }

    async fn download(&mut self) -> Result<(), ExecutionError> {
        self.advance(Phase::Download);
        let storage = self.context.storage.clone();
        let location = self.context.job.file_location.clone();
        let protocol = self.context.job.file_download_protocol.clone();

        if let RetrievalProtocol::Unsupported(other) = &protocol {
            return Err(ExecutionError::Setup(format!(
                "Received unsupported file download protocol: {other}"
            )));
        }

        tracing::info!(
            job_id = %self.context.job.id,
            root = %storage.root.display(),
            "Creating job storage directories"
        );
        if tokio::fs::try_exists(&storage.files_dir).await? {
            tokio::fs::remove_dir_all(&storage.files_dir).await?;
        }
        tokio::fs::create_dir_all(&storage.result_dir).await?;

        match protocol {
            RetrievalProtocol::Git => {
                self.fetcher
                    .clone_repository(&location, &storage.files_dir)
                    .await
                    .map_err(|e| ExecutionError::Download(format!("git clone failed: {e}")))?;
                if !exists(&storage.manifest_path).await {
                    return Err(ExecutionError::Setup(format!(
                        "Successfully cloned repository, but could not find {MANIFEST_FILE} at: {}",
                        storage.manifest_path.display()
                    )));
                }
            }
            RetrievalProtocol::Https => {
                tokio::fs::create_dir_all(&storage.files_dir).await?;
                self.fetcher
                    .download(&location, &storage.package_path)
                    .await
                    .map_err(|e| {
                        ExecutionError::Download(format!("downloading package failed: {e}"))
                    })?;
                if !exists(&storage.package_path).await {
                    return Err(ExecutionError::Setup(format!(
                        "Successfully downloaded {} from {location}, but could not find {}",
                        storage.package_name,
                        storage.package_path.display()
                    )));
                }
            }
            RetrievalProtocol::Unsupported(_) => {}
        }
        Ok(())
    }

    async fn extract(&mut self) -> Result<(), ExecutionError> {
        self.advance(Phase::Extract);
        let storage = self.context.storage.clone();
        let is_repository = self.context.job.file_download_protocol == RetrievalProtocol::Git;

        let format = if is_repository || storage.package_name.ends_with(MANIFEST_FILE) {
            tracing::debug!(job_id = %self.context.job.id, "Package is already unpacked");
            None
        } else {
            ArchiveFormat::from_name(&storage.package_name)
        };

        if let Some(format) = format {
            self.fetcher
                .extract(&storage.package_path, format, &storage.files_dir)
                .await
                .map_err(|e| {
                    ExecutionError::Setup(format!(
                        "extracting {} failed: {e}",
                        storage.package_name
                    ))
                })?;
        }

        if !exists(&storage.manifest_path).await {
            return Err(ExecutionError::InvalidPackage(format!(
                "Successfully extracted {}, but could not find {MANIFEST_FILE} at: {}",
                storage.package_path.display(),
                storage.manifest_path.display()
            )));
        }
        Ok(())
    }

    async fn build(&mut self) -> Result<(), ExecutionError> {
        self.advance(Phase::Build);
        let build_args = self.context.job.build_args.clone().unwrap_or_default();
        let output = self
            .runtime
            .build_image(
                &self.context.storage.files_dir,
                &self.context.image_name,
                &build_args,
            )
            .await
            .map_err(|e| ExecutionError::Build(format!("image build failed: {e}")))?;
        if !output.success() {
            return Err(ExecutionError::Build(format!(
                "image build failed with exit code {}: {}",
                output.code,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn run(&mut self) -> Result<ExecutionOutcome, ExecutionError> {
        self.advance(Phase::Run);
        let runtime_args = self.context.job.runtime_args.clone().unwrap_or_default();
        let spec = RunSpec {
            image: &self.context.image_name,
            container: &self.context.container_name,
            remove_after_run: self.config.storage.remove_container_after_run,
            args: &runtime_args,
        };
        let output = self
            .runtime
            .run_container(spec)
            .await
            .map_err(|e| ExecutionError::Execution(format!("container run failed: {e}")))?;
        interpret_run(output.code, &output.stdout, &output.stderr)
    }

    /// Best-effort removal of what the run left behind. Never fails.
    async fn cleanup(&mut self) {
        self.advance(Phase::Cleanup);
        let policy = self.config.storage.clone();
        let job_id = self.context.job.id.clone();
        let image = self.context.image_name.clone();
        let container = self.context.container_name.clone();

        // A system prune already covers images.
        if policy.purge_system_after_run {
            report(&job_id, "system prune", self.runtime.prune_system().await);
        } else if policy.purge_images_after_run {
            report(&job_id, "image prune", self.runtime.prune_images().await);
        }

        if policy.remove_container_after_run {
            match self.runtime.container_exists(&container).await {
                Ok(true) => report(
                    &job_id,
                    "container removal",
                    self.runtime.remove_container(&container).await,
                ),
                Ok(false) => {
                    tracing::debug!(%job_id, %container, "Container already gone");
                }
                Err(err) => {
                    tracing::warn!(%job_id, %container, error = %err, "Could not inspect container");
                }
            }
        }

        if policy.remove_image_after_run {
            match self.runtime.image_exists(&image).await {
                Ok(true) => report(
                    &job_id,
                    "image removal",
                    self.runtime.remove_image(&image).await,
                ),
                Ok(false) => {
                    tracing::debug!(%job_id, %image, "Image does not exist");
                }
                Err(err) => {
                    tracing::warn!(%job_id, %image, error = %err, "Could not inspect image");
                }
            }
        }
    }
}

fn report(job_id: &str, step: &str, result: Result<CommandOutput, RuntimeError>) {
    match result {
        Ok(output) if output.success() => {
            tracing::debug!(job_id, step, "Cleanup step done");
        }
        Ok(output) => {
            tracing::warn!(
                job_id,
                step,
                code = output.code,
                stderr = %output.stderr.trim(),
                "Cleanup step failed"
            );
        }
        Err(err) => {
            tracing::error!(job_id, step, error = %err, "Cleanup step could not run");
        }
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
