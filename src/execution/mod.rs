//! Per-job execution state machine.
//!
//! One [`Execution`] owns one [`ExecutionContext`] and drives it through
//! preflight, download, extract, build, run and cleanup, pushing every
//! change to the result store.

pub mod context;
pub mod outcome;
pub mod runner;

pub use context::{CapabilityProfile, ExecutionContext, Phase};
pub use outcome::ExecutionOutcome;
pub use runner::Execution;
