use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::ExecutionOutcome;
use crate::config::NodeConfig;
use crate::ledger::{JobDescriptor, NodeRecord};

/// Build manifest expected at the root of every package.
pub const MANIFEST_FILE: &str = "Dockerfile";

/// Progress of one job. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Created,
    Preflight,
    Download,
    Extract,
    Build,
    Run,
    Cleanup,
    Finished,
    Publishing,
    Published,
    Skipped,
    Rejected,
    TimedOut,
    NotElected,
}

impl Phase {
    /// Whether the node is done with the job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Published | Phase::Skipped | Phase::Rejected | Phase::TimedOut | Phase::NotElected
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Created => "Created",
            Phase::Preflight => "Preflight",
            Phase::Download => "Download file",
            Phase::Extract => "Extract file",
            Phase::Build => "Build image",
            Phase::Run => "Run image",
            Phase::Cleanup => "Cleanup",
            Phase::Finished => "Work completed",
            Phase::Publishing => "Publishing answer",
            Phase::Published => "Answer published",
            Phase::Skipped => "Answer not needed",
            Phase::Rejected => "Rejected",
            Phase::TimedOut => "Timed out",
            Phase::NotElected => "Not elected",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub phase: Phase,
    pub at: DateTime<Utc>,
}

/// Filesystem layout of one job, all under a root derived from the job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePaths {
    pub root: PathBuf,
    pub files_dir: PathBuf,
    pub result_dir: PathBuf,
    /// Last path segment of the package location.
    pub package_name: String,
    pub package_path: PathBuf,
    pub manifest_path: PathBuf,
}

impl StoragePaths {
    pub fn new(root: PathBuf, file_location: &str) -> Self {
        let files_dir = root.join("files");
        let result_dir = root.join("result");
        let package_name = package_name(file_location);
        let package_path = files_dir.join(&package_name);
        let manifest_path = files_dir.join(MANIFEST_FILE);
        Self {
            root,
            files_dir,
            result_dir,
            package_name,
            package_path,
            manifest_path,
        }
    }
}

fn package_name(file_location: &str) -> String {
    let trimmed = file_location.trim_end_matches('/');
    let without_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    Path::new(without_query)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// What this node is willing to run, as registered on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityProfile {
    /// Ceiling on publishing an answer, in milliseconds.
    pub absolute_timeout_ms: u64,
    pub allow_network: bool,
    pub allow_gpu: bool,
}

impl Default for CapabilityProfile {
    fn default() -> Self {
        Self {
            absolute_timeout_ms: 60_000,
            allow_network: true,
            allow_gpu: false,
        }
    }
}

impl From<&NodeRecord> for CapabilityProfile {
    fn from(node: &NodeRecord) -> Self {
        Self {
            absolute_timeout_ms: node.absolute_timeout,
            allow_network: node.allow_network,
            allow_gpu: node.allow_gpu,
        }
    }
}

/// Mutable record of one execution attempt.
///
/// Owned by a single `Execution`; snapshots of it are what the result store
/// holds and broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub job: JobDescriptor,
    pub node_id: String,
    pub profile: CapabilityProfile,
    pub phase: Phase,
    pub history: Vec<PhaseChange>,
    pub storage: StoragePaths,
    pub image_name: String,
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_post_answer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(config: &NodeConfig, profile: CapabilityProfile, job: JobDescriptor) -> Self {
        let now = Utc::now();
        let stamp = now.timestamp_millis();
        let storage = StoragePaths::new(config.storage_root(&job.id), &job.file_location);
        Self {
            image_name: config.image_name(&job.id, stamp),
            container_name: config.container_name(&job.id, stamp),
            node_id: config.node_id.clone(),
            profile,
            phase: Phase::Created,
            history: vec![PhaseChange {
                phase: Phase::Created,
                at: now,
            }],
            storage,
            should_post_answer: None,
            outcome: None,
            created_at: now,
            updated_at: now,
            job,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    pub fn is_elected(&self) -> bool {
        self.job.elected_nodes.iter().any(|id| id == &self.node_id)
    }

    /// Moves to `phase`. Returns `false` and changes nothing when `phase`
    /// is not strictly after the current one.
    pub fn advance(&mut self, phase: Phase) -> bool {
        if phase <= self.phase {
            tracing::debug!(
                job_id = %self.job.id,
                current = %self.phase,
                requested = %phase,
                "Ignoring phase rewind"
            );
            return false;
        }
        let now = Utc::now();
        self.phase = phase;
        self.history.push(PhaseChange { phase, at: now });
        self.updated_at = now;
        true
    }

    /// Records the terminal outcome. Only the first call has any effect.
    pub fn set_outcome(&mut self, outcome: ExecutionOutcome) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        self.updated_at = Utc::now();
        true
    }

    pub fn set_should_post_answer(&mut self, should_post: bool) {
        self.should_post_answer = Some(should_post);
        self.updated_at = Utc::now();
    }
}
