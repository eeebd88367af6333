pub mod client;
pub mod error;
pub mod types;

use std::future::Future;

pub use client::RpcLedger;
pub use error::LedgerError;
pub use types::{
    AnswerStatus, AnswerSubmission, JobDescriptor, NodeRecord, NodeRegistration, RetrievalProtocol,
};

/// View and state-changing calls the node makes against the coordinator.
pub trait Ledger: Send + Sync + 'static {
    fn get_job(&self, job_id: &str)
    -> impl Future<Output = Result<JobDescriptor, LedgerError>> + Send;

    /// Whether an answer from `node_id` is still wanted. A job may already be
    /// settled by other nodes.
    fn should_post_answer(
        &self,
        job_id: &str,
        node_id: &str,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    fn get_node(&self, node_id: &str)
    -> impl Future<Output = Result<NodeRecord, LedgerError>> + Send;

    /// Available balance of an account, in the smallest unit.
    fn account_balance(
        &self,
        account_id: &str,
    ) -> impl Future<Output = Result<u128, LedgerError>> + Send;

    fn post_answer(
        &self,
        answer: &AnswerSubmission,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    fn reject_job(
        &self,
        job_id: &str,
        node_id: &str,
        message: &str,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    fn register_node(
        &self,
        registration: &NodeRegistration,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    fn collect_reward(
        &self,
        job_id: &str,
        node_id: &str,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;
}
