//! Plan state machine error types.

use thiserror::Error;

use crate::store::StoreError;

use super::PlanState;

/// Errors surfaced by plan mutations and validation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlanError {
    /// No plan document exists for the id.
    #[error("no plan recorded for {plan_id}")]
    PlanNotFound { plan_id: String },

    /// The plan has no step with the given id.
    #[error("plan {plan_id} has no step {step_id}")]
    StepNotFound { plan_id: String, step_id: String },

    /// The requested transition is outside the table.
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: PlanState, to: PlanState },

    /// Two steps share an id.
    #[error("plan {plan_id} has duplicate step id {step_id}")]
    DuplicateStepId { plan_id: String, step_id: String },

    /// More than one step is in progress.
    #[error("plan {plan_id} has {count} steps in progress, at most one is allowed")]
    MultipleStepsInProgress { plan_id: String, count: usize },

    /// The checkpoint is missing a required field.
    #[error("plan {plan_id} checkpoint is missing a {field}")]
    CheckpointIncomplete {
        plan_id: String,
        field: &'static str,
    },

    /// A strict-mode receipt check failed.
    #[error("checklist failure: {detail}")]
    Checklist { detail: String },

    /// Reading or writing the plan document failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
