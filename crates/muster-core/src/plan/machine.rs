//! The plan/step transition table.
//!
//! One table governs both plans and steps:
//!
//! ```text
//! queued      -> queued | in_progress | blocked | done
//! in_progress -> in_progress | blocked | done
//! blocked     -> blocked | in_progress | done
//! done        -> done
//! ```
//!
//! Self-transitions are allowed everywhere so idempotent re-application is
//! never an error. `done` is absorbing: nothing leaves it, and `queued` is
//! unreachable once left.

use super::{PlanError, PlanState};

/// Whether the table permits `from -> to`.
#[must_use]
pub const fn transition_allowed(from: PlanState, to: PlanState) -> bool {
    match from {
        PlanState::Queued => true,
        PlanState::InProgress | PlanState::Blocked => matches!(
            to,
            PlanState::InProgress | PlanState::Blocked | PlanState::Done
        ),
        PlanState::Done => matches!(to, PlanState::Done),
    }
}

/// Checks the table, failing with [`PlanError::IllegalTransition`] on a
/// move it does not permit.
pub fn ensure_transition(from: PlanState, to: PlanState) -> Result<(), PlanError> {
    if transition_allowed(from, to) {
        Ok(())
    } else {
        Err(PlanError::IllegalTransition { from, to })
    }
}
