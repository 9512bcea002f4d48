//! Claim lifecycle and ownership guard error types.

use thiserror::Error;

use crate::journal::JournalError;
use crate::store::StoreError;

use super::ClaimStatus;

/// Errors surfaced by claim operations and the ownership guard.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClaimError {
    /// Another agent holds a live claim on the task.
    #[error(
        "task {task_id} is already claimed by {owner} ({status}); \
         ask them to release it or wait for the claim to go terminal"
    )]
    Conflict {
        task_id: String,
        owner: String,
        status: ClaimStatus,
    },

    /// A fresh claim was attempted without an assignment naming the agent.
    #[error(
        "task {task_id} is not assigned to {agent_id}; \
         record an assignment first or claim with an explicit override"
    )]
    AssignmentRequired {
        task_id: String,
        agent_id: String,
        /// Agent the existing assignment names, when one exists.
        assigned_to: Option<String>,
    },

    /// Release was attempted on a task with no recorded claim.
    #[error("no claim recorded for task {task_id}; nothing to release")]
    NoClaim { task_id: String },

    /// Release was attempted by an agent that does not own the claim.
    #[error("claim on task {task_id} belongs to {owner}, not {agent_id}")]
    ForeignOwner {
        task_id: String,
        owner: String,
        agent_id: String,
    },

    /// The ownership guard found no claim for a guarded action.
    #[error("guarded action {action:?} on task {task_id} requires a claim; claim it first")]
    MissingClaim { task_id: String, action: String },

    /// The ownership guard found a live claim held by another agent.
    #[error(
        "guarded action {action:?} on task {task_id} refused: \
         claim is held by {owner} ({status})"
    )]
    ForeignClaim {
        task_id: String,
        owner: String,
        status: ClaimStatus,
        action: String,
    },

    /// Reading or writing a record failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Appending to a journal log failed.
    #[error(transparent)]
    Journal(#[from] JournalError),
}
