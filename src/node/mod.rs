//! Node orchestrator.
//!
//! [`Node`] bootstraps the node identity against the ledger, filters feed
//! events by coordinator and election, runs at most one execution per job id
//! at a time, and publishes or rejects each outcome.

pub mod events;
pub mod feed;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::NodeConfig;
use crate::error::{ExecutionError, FailureKind, NodeError};
use crate::execution::{CapabilityProfile, Execution, ExecutionOutcome, Phase};
use crate::fetch::PackageFetcher;
use crate::ledger::{AnswerSubmission, Ledger, LedgerError, NodeRecord, NodeRegistration};
use crate::runtime::ContainerRuntime;
use crate::store::ResultStore;

pub use events::{FeedEvent, JobCompletion, parse_message};

/// Deposit attached when self-registering: one whole token.
pub const REGISTRATION_DEPOSIT: u128 = 1_000_000_000_000_000_000_000_000;

/// Capabilities requested when self-registering.
const REGISTRATION_TIMEOUT_MS: u64 = 60_000;

/// What happened to one dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Another execution of the same job id is still running.
    AlreadyRunning,
    Completed(Phase),
    /// The answer or rejection could not be delivered to the ledger.
    PublishFailed,
}

pub struct Node<L, R, F> {
    config: Arc<NodeConfig>,
    ledger: Arc<L>,
    runtime: Arc<R>,
    fetcher: Arc<F>,
    store: Arc<ResultStore>,
    profile: CapabilityProfile,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl<L, R, F> Clone for Node<L, R, F> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            ledger: Arc::clone(&self.ledger),
            runtime: Arc::clone(&self.runtime),
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            profile: self.profile,
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

/// Holds a job id in the in-flight set until dropped.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, job_id: &str) -> Option<Self> {
        let mut jobs = set.lock().unwrap_or_else(|p| p.into_inner());
        if !jobs.insert(job_id.to_string()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            job_id: job_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut jobs = self.set.lock().unwrap_or_else(|p| p.into_inner());
        jobs.remove(&self.job_id);
    }
}

impl<L, R, F> Node<L, R, F>
where
    L: Ledger,
    R: ContainerRuntime,
    F: PackageFetcher,
{
    pub fn new(
        config: Arc<NodeConfig>,
        ledger: Arc<L>,
        runtime: Arc<R>,
        fetcher: Arc<F>,
        store: Arc<ResultStore>,
    ) -> Self {
        Self {
            config,
            ledger,
            runtime,
            fetcher,
            store,
            profile: CapabilityProfile::default(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Every host tool the runtime and fetcher need that is missing.
    pub async fn missing_tools(&self) -> Vec<String> {
        let mut missing = self.runtime.missing_tools().await;
        missing.extend(self.fetcher.missing_tools().await);
        missing
    }

    /// Verifies host tools, ensures the node is registered and loads its
    /// capability profile. Any error here is fatal.
    pub async fn bootstrap(&mut self) -> Result<(), NodeError> {
        let node_id = self.config.node_id.clone();
        tracing::info!(node_id = %node_id, "Initializing node");

        let missing = self.missing_tools().await;
        if !missing.is_empty() {
            return Err(NodeError::MissingTools(missing));
        }

        let record = match self.ledger.get_node(&node_id).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    node_id = %node_id,
                    coordinator = %self.config.coordinator_id,
                    error = %err,
                    "Node not found on ledger, attempting to register"
                );
                self.register().await?
            }
        };

        tracing::info!(
            node_id = %record.id,
            allow_network = record.allow_network,
            allow_gpu = record.allow_gpu,
            absolute_timeout = record.absolute_timeout,
            "Node registered"
        );
        self.profile = CapabilityProfile::from(&record);
        Ok(())
    }

    async fn register(&self) -> Result<NodeRecord, NodeError> {
        let node_id = &self.config.node_id;
        let available = self.ledger.account_balance(&self.config.account_id).await?;
        if available <= REGISTRATION_DEPOSIT {
            return Err(NodeError::InsufficientDeposit {
                node_id: node_id.clone(),
                available,
                required: REGISTRATION_DEPOSIT,
            });
        }

        tracing::info!(node_id = %node_id, "Registering node");
        let registration = NodeRegistration {
            name: self.config.node_name.clone(),
            absolute_timeout: REGISTRATION_TIMEOUT_MS,
            allow_network: true,
            allow_gpu: false,
            deposit: REGISTRATION_DEPOSIT,
        };
        self.ledger.register_node(&registration).await?;
        Ok(self.ledger.get_node(node_id).await?)
    }

    /// Handles one raw feed frame. Undecodable frames are logged and dropped.
    pub async fn handle_message(&self, raw: &str) {
        match parse_message(raw) {
            Ok(Some(event)) => self.handle_event(event).await,
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "Dropping malformed feed message"),
        }
    }

    pub async fn handle_event(&self, event: FeedEvent) {
        if event.coordinator_id() != self.config.coordinator_id {
            tracing::debug!(
                coordinator = %event.coordinator_id(),
                job_id = %event.job_id(),
                event = event.tag(),
                "Ignoring event from another coordinator"
            );
            return;
        }

        match event {
            FeedEvent::JobCreated(announcement) | FeedEvent::JobRetry(announcement) => {
                tracing::info!(job_id = %announcement.job_id, "Job announced, checking election");
                if !announcement.node_ids.contains(&self.config.node_id) {
                    tracing::debug!(job_id = %announcement.job_id, "Not elected for job");
                    return;
                }
                tracing::info!(job_id = %announcement.job_id, "Elected, executing job");
                if let Err(err) = self.dispatch_job(&announcement.job_id).await {
                    tracing::error!(job_id = %announcement.job_id, error = %err, "Job dispatch failed");
                }
            }
            FeedEvent::JobCompleted(completion) => self.on_job_completed(&completion).await,
        }
    }

    async fn on_job_completed(&self, completion: &JobCompletion) {
        tracing::info!(job_id = %completion.job_id, "Job completed");
        if !completion.payout_node_ids.contains(&self.config.node_id) {
            return;
        }
        tracing::info!(job_id = %completion.job_id, "Collecting reward");
        match self
            .ledger
            .collect_reward(&completion.job_id, &self.config.node_id)
            .await
        {
            Ok(()) => tracing::info!(job_id = %completion.job_id, "Reward collected"),
            Err(err) => {
                tracing::error!(job_id = %completion.job_id, error = %err, "Reward collection failed")
            }
        }
    }

    /// Fetches, executes and settles one job.
    ///
    /// A job id already being executed is absorbed. A job whose previous
    /// attempt is finished runs again with a fresh context.
    pub async fn dispatch_job(&self, job_id: &str) -> Result<Dispatch, LedgerError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, job_id) else {
            tracing::info!(job_id, "Job already running, ignoring duplicate announcement");
            return Ok(Dispatch::AlreadyRunning);
        };

        let job = self.ledger.get_job(job_id).await?;
        let mut execution = Execution::new(
            Arc::clone(&self.config),
            self.profile,
            job,
            Arc::clone(&self.runtime),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.store),
        );
        if !self.store.insert(job_id, execution.context().clone()) {
            tracing::info!(job_id, "Replacing record of a previous attempt");
            self.store.update(job_id, execution.context().clone());
        }

        match execution.execute().await {
            Ok(outcome) if outcome.error == Some(FailureKind::NotElected) => {
                execution.advance(Phase::NotElected);
                Ok(Dispatch::Completed(Phase::NotElected))
            }
            Ok(outcome) => self.settle(&mut execution, &outcome).await,
            Err(err @ ExecutionError::Rejected(_)) => {
                let message = err.to_string();
                tracing::info!(job_id, reason = %message, "Rejecting job");
                let delivered = self
                    .ledger
                    .reject_job(job_id, &self.config.node_id, &message)
                    .await;
                execution.advance(Phase::Rejected);
                match delivered {
                    Ok(()) => Ok(Dispatch::Completed(Phase::Rejected)),
                    Err(err) => {
                        tracing::error!(job_id, error = %err, "Publishing rejection failed");
                        Ok(Dispatch::PublishFailed)
                    }
                }
            }
            Err(err) => {
                let outcome = ExecutionOutcome::from(&err);
                self.settle(&mut execution, &outcome).await
            }
        }
    }

    /// Publishes `outcome`, bounded by the node's absolute timeout.
    async fn settle(
        &self,
        execution: &mut Execution<R, F>,
        outcome: &ExecutionOutcome,
    ) -> Result<Dispatch, LedgerError> {
        let limit = Duration::from_millis(self.profile.absolute_timeout_ms);
        let job_id = execution.job_id().to_string();
        match tokio::time::timeout(limit, self.publish_answer(execution, outcome)).await {
            Ok(Ok(phase)) => Ok(Dispatch::Completed(phase)),
            Ok(Err(err)) => {
                tracing::error!(job_id = %job_id, error = %err, "Publishing answer failed");
                Ok(Dispatch::PublishFailed)
            }
            Err(_) => {
                tracing::warn!(
                    job_id = %job_id,
                    timeout_ms = self.profile.absolute_timeout_ms,
                    "Publishing answer timed out"
                );
                execution.advance(Phase::TimedOut);
                Ok(Dispatch::Completed(Phase::TimedOut))
            }
        }
    }

    async fn publish_answer(
        &self,
        execution: &mut Execution<R, F>,
        outcome: &ExecutionOutcome,
    ) -> Result<Phase, LedgerError> {
        let job_id = execution.job_id().to_string();
        let node_id = &self.config.node_id;
        execution.advance(Phase::Publishing);

        let should_post = self.ledger.should_post_answer(&job_id, node_id).await?;
        tracing::debug!(job_id = %job_id, should_post, "Checked whether to post answer");
        execution.record_should_post_answer(should_post);
        if !should_post {
            tracing::info!(job_id = %job_id, "Answer no longer needed, skipping");
            execution.advance(Phase::Skipped);
            return Ok(Phase::Skipped);
        }

        let submission = AnswerSubmission {
            job_id: job_id.clone(),
            node_id: node_id.clone(),
            answer: outcome.result.clone(),
            message: outcome.message.clone(),
            status: outcome.status(),
        };
        tracing::info!(job_id = %job_id, status = ?submission.status, "Publishing answer");
        self.ledger.post_answer(&submission).await?;
        execution.advance(Phase::Published);
        Ok(Phase::Published)
    }
}
