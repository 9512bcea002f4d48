//! Coordinator error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::claim::ClaimError;
use crate::journal::JournalError;
use crate::plan::PlanError;
use crate::session::SessionError;
use crate::store::StoreError;

/// Errors that stop a coordinator cycle before it completes.
///
/// These are guard and infrastructure failures, distinct from the circuit
/// breaker: a tripped breaker is a *completed* cycle with exit code 2,
/// while these errors abort the cycle and map to exit code 1.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoordinatorError {
    /// No manager identity was given and none could be resolved from the
    /// workspace records.
    #[error(
        "no manager agent found; register a manager manifest or name one explicitly"
    )]
    ManagerUnresolved,

    /// The plan names no such step.
    #[error("plan {plan_id} has no step {step_id}")]
    StepNotFound { plan_id: String, step_id: String },

    /// The backlog document does not exist.
    #[error("backlog document {path} does not exist")]
    BacklogMissing { path: PathBuf },

    /// The readiness evaluator itself failed to run.
    #[error("readiness evaluator failed: {detail}")]
    Evaluator { detail: String },

    /// The worker harness could not be invoked at all.
    ///
    /// A worker that runs and exits non-zero is a breaker fault, not this.
    #[error("worker harness failed to launch: {detail}")]
    Worker { detail: String },

    /// The manager failed the session freshness guard.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A claim operation failed while preparing the cycle.
    #[error(transparent)]
    Claim(#[from] ClaimError),

    /// A plan operation failed.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Reading or writing a record failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reading or appending journal logs failed.
    #[error(transparent)]
    Journal(#[from] JournalError),
}
