use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::LedgerError;

/// Node-level failures. Anything surfacing here during bootstrap is fatal.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Could not start node, missing the following software: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    #[error(
        "Node {node_id} is not registered and can't afford the deposit to register (available {available}, required {required})"
    )]
    InsufficientDeposit {
        node_id: String,
        available: u128,
        required: u128,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Event feed error: {0}")]
    Feed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Failures raised while executing a single job.
///
/// Only [`ExecutionError::Rejected`] ever escapes `Execution::execute`; every
/// other variant is folded into an outcome at that boundary.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The job asks for a capability this node does not allow.
    #[error("{0}")]
    Rejected(String),

    /// Malformed job input caught before any I/O.
    #[error("{0}")]
    Preflight(String),

    /// Fetching the package failed.
    #[error("{0}")]
    Download(String),

    /// The package was fetched or unpacked incorrectly, or the retrieval
    /// protocol is not supported.
    #[error("{0}")]
    Setup(String),

    /// The package unpacked cleanly but carries no build manifest.
    #[error("{0}")]
    InvalidPackage(String),

    #[error("{0}")]
    Build(String),

    #[error("{0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutionError::Rejected(_) => FailureKind::Rejected,
            ExecutionError::Preflight(_) => FailureKind::Preflight,
            ExecutionError::Download(_) => FailureKind::Download,
            ExecutionError::Setup(_) => FailureKind::Setup,
            ExecutionError::InvalidPackage(_) => FailureKind::InvalidPackage,
            ExecutionError::Build(_) => FailureKind::Build,
            ExecutionError::Execution(_) => FailureKind::Execution,
            ExecutionError::Io(_) => FailureKind::Internal,
        }
    }
}

/// Classifies a job outcome. Absence of a kind on an outcome means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    NotElected,
    #[serde(rename = "RejectionError")]
    Rejected,
    #[serde(rename = "PreflightError")]
    Preflight,
    #[serde(rename = "DownloadError")]
    Download,
    #[serde(rename = "SetupError")]
    Setup,
    #[serde(rename = "InvalidPackageError")]
    InvalidPackage,
    #[serde(rename = "BuildError")]
    Build,
    #[serde(rename = "ExecutionError")]
    Execution,
    #[serde(rename = "UnknownError")]
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotElected => "NotElected",
            FailureKind::Rejected => "RejectionError",
            FailureKind::Preflight => "PreflightError",
            FailureKind::Download => "DownloadError",
            FailureKind::Setup => "SetupError",
            FailureKind::InvalidPackage => "InvalidPackageError",
            FailureKind::Build => "BuildError",
            FailureKind::Execution => "ExecutionError",
            FailureKind::Internal => "UnknownError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
