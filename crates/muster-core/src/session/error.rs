//! Session freshness guard error types.

use thiserror::Error;

use crate::journal::JournalError;
use crate::store::StoreError;

/// Errors surfaced by the session freshness guard.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// No boot receipt exists for the agent.
    #[error(
        "no session boot receipt for {agent_id}; \
         record a session boot before acting (or override)"
    )]
    Missing { agent_id: String },

    /// The boot receipt is older than the freshness window.
    #[error(
        "session for {agent_id} is {age_secs}s old, window is {max_age_secs}s; \
         boot a fresh session (or override)"
    )]
    Stale {
        agent_id: String,
        age_secs: u64,
        max_age_secs: u64,
    },

    /// The receipt exists but does not carry the expected schema tag.
    #[error("session receipt for {agent_id} has schema {found:?}, expected {expected:?}")]
    BadSchema {
        agent_id: String,
        found: String,
        expected: &'static str,
    },

    /// Reading or writing the receipt failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Appending the bypass audit entry failed.
    #[error(transparent)]
    Journal(#[from] JournalError),
}
