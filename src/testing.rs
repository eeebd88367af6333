//! In-crate fakes for the ledger, container runtime and package fetcher.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::NodeConfig;
use crate::execution::context::MANIFEST_FILE;
use crate::execution::{CapabilityProfile, ExecutionContext};
use crate::fetch::{ArchiveFormat, FetchError, PackageFetcher};
use crate::ledger::{
    AnswerSubmission, JobDescriptor, Ledger, LedgerError, NodeRecord, NodeRegistration,
    RetrievalProtocol,
};
use crate::runtime::{CommandOutput, ContainerRuntime, RunSpec, RuntimeError};

pub fn job(id: &str) -> JobDescriptor {
    JobDescriptor {
        id: id.to_string(),
        owner_id: "owner.test.near".into(),
        coordinator_id: "coordinator.test.near".into(),
        file_location: "https://example.com/hello.git".into(),
        file_download_protocol: RetrievalProtocol::Git,
        network_required: false,
        gpu_required: false,
        min_nodes: 1,
        timeout_seconds: 60,
        elected_nodes: vec!["node1".into()],
        build_args: None,
        runtime_args: None,
    }
}

pub fn node_record(id: &str) -> NodeRecord {
    NodeRecord {
        id: id.to_string(),
        owner_id: "owner.test.near".into(),
        allow_network: true,
        allow_gpu: false,
        absolute_timeout: 60_000,
        successful_runs: 0,
        failed_runs: 0,
        rejected_runs: 0,
        unanswered_runs: 0,
        registration_time: 0,
    }
}

/// Config for node `node1` with job storage under `dir`.
pub fn test_config(dir: &Path) -> NodeConfig {
    NodeConfig {
        node_id: "node1".into(),
        storage_dir: dir.join("$JOB_ID").display().to_string(),
        image_name_format: "$JOB_ID-$TIMESTAMP".into(),
        container_name_format: "bounty-$JOB_ID-$TIMESTAMP".into(),
        ..Default::default()
    }
}

/// A fresh context for `id`; nothing touches its storage root.
pub fn context(id: &str) -> ExecutionContext {
    let config = test_config(Path::new("/tmp/bounty-node-test"));
    ExecutionContext::new(&config, CapabilityProfile::default(), job(id))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Build { image: String, build_args: Vec<String> },
    Run { image: String, container: String, args: Vec<String> },
    PruneSystem,
    PruneImages,
    ContainerExists(String),
    RemoveContainer(String),
    ImageExists(String),
    RemoveImage(String),
}

pub struct FakeRuntime {
    calls: Mutex<Vec<Call>>,
    build_output: CommandOutput,
    run_output: CommandOutput,
    resources_exist: bool,
    panic_on_build: bool,
    missing: Vec<String>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            build_output: CommandOutput::default(),
            run_output: CommandOutput::default(),
            resources_exist: false,
            panic_on_build: false,
            missing: Vec::new(),
        }
    }
}

impl FakeRuntime {
    pub fn with_build(mut self, output: CommandOutput) -> Self {
        self.build_output = output;
        self
    }

    pub fn with_run(mut self, output: CommandOutput) -> Self {
        self.run_output = output;
        self
    }

    /// Containers and images report as existing during cleanup.
    pub fn with_existing_resources(mut self) -> Self {
        self.resources_exist = true;
        self
    }

    pub fn panicking_build(mut self) -> Self {
        self.panic_on_build = true;
        self
    }

    pub fn with_missing_tools(mut self, tools: &[&str]) -> Self {
        self.missing = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn ok() -> Result<CommandOutput, RuntimeError> {
        Ok(CommandOutput::default())
    }
}

impl ContainerRuntime for FakeRuntime {
    async fn missing_tools(&self) -> Vec<String> {
        self.missing.clone()
    }

    async fn build_image(
        &self,
        _context_dir: &Path,
        image: &str,
        build_args: &[String],
    ) -> Result<CommandOutput, RuntimeError> {
        self.record(Call::Build {
            image: image.to_string(),
            build_args: build_args.to_vec(),
        });
        if self.panic_on_build {
            panic!("builder exploded");
        }
        Ok(self.build_output.clone())
    }

    async fn run_container(&self, spec: RunSpec<'_>) -> Result<CommandOutput, RuntimeError> {
        self.record(Call::Run {
            image: spec.image.to_string(),
            container: spec.container.to_string(),
            args: spec.args.to_vec(),
        });
        Ok(self.run_output.clone())
    }

    async fn prune_system(&self) -> Result<CommandOutput, RuntimeError> {
        self.record(Call::PruneSystem);
        Self::ok()
    }

    async fn prune_images(&self) -> Result<CommandOutput, RuntimeError> {
        self.record(Call::PruneImages);
        Self::ok()
    }

    async fn container_exists(&self, container: &str) -> Result<bool, RuntimeError> {
        self.record(Call::ContainerExists(container.to_string()));
        Ok(self.resources_exist)
    }

    async fn remove_container(&self, container: &str) -> Result<CommandOutput, RuntimeError> {
        self.record(Call::RemoveContainer(container.to_string()));
        Self::ok()
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        self.record(Call::ImageExists(image.to_string()));
        Ok(self.resources_exist)
    }

    async fn remove_image(&self, image: &str) -> Result<CommandOutput, RuntimeError> {
        self.record(Call::RemoveImage(image.to_string()));
        Self::ok()
    }
}

/// Writes packages straight to disk. By default every fetched or extracted
/// package carries a manifest.
pub struct FakeFetcher {
    calls: Mutex<Vec<String>>,
    write_manifest: bool,
    fail: bool,
}

impl Default for FakeFetcher {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            write_manifest: true,
            fail: false,
        }
    }
}

impl FakeFetcher {
    pub fn without_manifest() -> Self {
        Self {
            write_manifest: false,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self) -> Result<(), FetchError> {
        if self.fail {
            return Err(FetchError::Tool {
                program: "fake".into(),
                code: 128,
                stderr: "repository not found".into(),
            });
        }
        Ok(())
    }

    fn write_manifest_into(&self, dir: &Path) -> Result<(), FetchError> {
        if self.write_manifest {
            std::fs::write(dir.join(MANIFEST_FILE), "FROM alpine\n")?;
        }
        Ok(())
    }
}

impl PackageFetcher for FakeFetcher {
    async fn missing_tools(&self) -> Vec<String> {
        Vec::new()
    }

    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        self.record(format!("clone {url}"));
        self.check()?;
        std::fs::create_dir_all(dest)?;
        self.write_manifest_into(dest)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        self.record(format!("download {url}"));
        self.check()?;
        std::fs::write(dest, b"archive")?;
        Ok(())
    }

    async fn extract(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        dest: &Path,
    ) -> Result<(), FetchError> {
        self.record(format!("extract {format:?} {}", archive.display()));
        self.check()?;
        self.write_manifest_into(dest)
    }
}

/// Ledger held in memory. Records every state-changing call.
#[derive(Default)]
pub struct FakeLedger {
    jobs: HashMap<String, JobDescriptor>,
    node: Mutex<Option<NodeRecord>>,
    registered_node: Option<NodeRecord>,
    balance: u128,
    skip_answers: bool,
    refuse_rejections: bool,
    job_delay: Option<Duration>,
    post_delay: Option<Duration>,
    get_job_calls: AtomicUsize,
    answers: Mutex<Vec<AnswerSubmission>>,
    rejections: Mutex<Vec<(String, String, String)>>,
    rewards: Mutex<Vec<(String, String)>>,
    registrations: Mutex<Vec<NodeRegistration>>,
}

impl FakeLedger {
    pub fn with_job(job: JobDescriptor) -> Self {
        let mut ledger = Self::default();
        ledger.jobs.insert(job.id.clone(), job);
        ledger
    }

    pub fn with_node(self, node: NodeRecord) -> Self {
        *self.node.lock().unwrap() = Some(node);
        self
    }

    pub fn with_balance(mut self, balance: u128) -> Self {
        self.balance = balance;
        self
    }

    /// Node record returned once `register_node` has been called.
    pub fn register_as(mut self, node: NodeRecord) -> Self {
        self.registered_node = Some(node);
        self
    }

    pub fn should_post(mut self, should_post: bool) -> Self {
        self.skip_answers = !should_post;
        self
    }

    /// `reject_job` fails with an RPC error.
    pub fn refusing_rejections(mut self) -> Self {
        self.refuse_rejections = true;
        self
    }

    pub fn job_delay(mut self, delay: Duration) -> Self {
        self.job_delay = Some(delay);
        self
    }

    pub fn post_delay(mut self, delay: Duration) -> Self {
        self.post_delay = Some(delay);
        self
    }

    pub fn get_job_calls(&self) -> usize {
        self.get_job_calls.load(Ordering::SeqCst)
    }

    pub fn answers(&self) -> Vec<AnswerSubmission> {
        self.answers.lock().unwrap().clone()
    }

    pub fn rejections(&self) -> Vec<(String, String, String)> {
        self.rejections.lock().unwrap().clone()
    }

    pub fn rewards(&self) -> Vec<(String, String)> {
        self.rewards.lock().unwrap().clone()
    }

    pub fn registrations(&self) -> Vec<NodeRegistration> {
        self.registrations.lock().unwrap().clone()
    }
}

impl Ledger for FakeLedger {
    async fn get_job(&self, job_id: &str) -> Result<JobDescriptor, LedgerError> {
        self.get_job_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.job_delay {
            tokio::time::sleep(delay).await;
        }
        self.jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("job {job_id}")))
    }

    async fn should_post_answer(&self, _job_id: &str, _node_id: &str) -> Result<bool, LedgerError> {
        Ok(!self.skip_answers)
    }

    async fn get_node(&self, node_id: &str) -> Result<NodeRecord, LedgerError> {
        self.node
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| LedgerError::NotFound(format!("node {node_id}")))
    }

    async fn account_balance(&self, _account_id: &str) -> Result<u128, LedgerError> {
        Ok(self.balance)
    }

    async fn post_answer(&self, answer: &AnswerSubmission) -> Result<(), LedgerError> {
        if let Some(delay) = self.post_delay {
            tokio::time::sleep(delay).await;
        }
        self.answers.lock().unwrap().push(answer.clone());
        Ok(())
    }

    async fn reject_job(&self, job_id: &str, node_id: &str, message: &str) -> Result<(), LedgerError> {
        if self.refuse_rejections {
            return Err(LedgerError::Rpc {
                method: "reject_job".into(),
                code: -32000,
                message: "ledger unavailable".into(),
            });
        }
        self.rejections.lock().unwrap().push((
            job_id.to_string(),
            node_id.to_string(),
            message.to_string(),
        ));
        Ok(())
    }

    async fn register_node(&self, registration: &NodeRegistration) -> Result<(), LedgerError> {
        self.registrations.lock().unwrap().push(registration.clone());
        *self.node.lock().unwrap() = self.registered_node.clone();
        Ok(())
    }

    async fn collect_reward(&self, job_id: &str, node_id: &str) -> Result<(), LedgerError> {
        self.rewards
            .lock()
            .unwrap()
            .push((job_id.to_string(), node_id.to_string()));
        Ok(())
    }
}
