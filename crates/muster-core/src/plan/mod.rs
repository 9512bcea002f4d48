//! Plan documents and their state machine.
//!
//! A plan is an ordered list of steps plus a human checkpoint, stored as
//! one JSON document under `records/plans/`. Plans and steps share one
//! status vocabulary and one transition table (see [`machine`]); every
//! mutation re-validates the structural invariants before the document is
//! written back:
//!
//! - step ids are unique within the plan
//! - at most one step is in progress
//! - the checkpoint names a non-empty description and owner
//!
//! Strict receipt validation is separate and opt-in (see [`validate`]).

mod error;
pub mod machine;
pub mod validate;

pub use error::PlanError;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::RecordStore;

/// Status shared by plans and their steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    /// Not started.
    Queued,
    /// Being worked right now.
    InProgress,
    /// Waiting on something external.
    Blocked,
    /// Finished. Absorbing.
    Done,
}

impl PlanState {
    /// Returns the wire representation of this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
        }
    }

    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a plan's human checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    /// Review has not happened yet.
    Pending,
    /// The owner signed off; strict mode then demands receipts.
    Satisfied,
    /// A later plan made this checkpoint moot.
    Superseded,
}

impl CheckpointState {
    /// Returns the wire representation of this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Satisfied => "satisfied",
            Self::Superseded => "superseded",
        }
    }
}

/// Human review gate attached to every plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    /// What the reviewer is expected to confirm.
    pub description: String,
    /// Who confirms it.
    pub owner: String,
    pub status: CheckpointState,
}

impl Checkpoint {
    /// Creates a pending checkpoint.
    #[must_use]
    pub fn new(description: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            owner: owner.into(),
            status: CheckpointState::Pending,
        }
    }
}

/// One unit of work inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub id: String,
    pub title: String,
    pub status: PlanState,
    /// Accumulated notes; mutations append rather than replace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    /// Receipt paths expected or produced by this step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receipts: Vec<String>,
}

impl Step {
    /// Creates a queued step.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: PlanState::Queued,
            notes: String::new(),
            receipts: Vec::new(),
        }
    }

    /// Appends a receipt path.
    #[must_use]
    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipts.push(receipt.into());
        self
    }
}

/// A plan document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub plan_id: String,
    pub status: PlanState,
    pub steps: Vec<Step>,
    pub checkpoint: Checkpoint,
    /// Plan-level receipt paths.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receipts: Vec<String>,
    /// Systemic review targets fed to the readiness evaluator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub systemic_targets: Vec<String>,
    /// Layer review targets fed to the readiness evaluator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layer_targets: Vec<String>,
}

impl Plan {
    /// Creates a queued plan with no steps.
    #[must_use]
    pub fn new(plan_id: impl Into<String>, checkpoint: Checkpoint) -> Self {
        Self {
            plan_id: plan_id.into(),
            status: PlanState::Queued,
            steps: Vec::new(),
            checkpoint,
            receipts: Vec::new(),
            systemic_targets: Vec::new(),
            layer_targets: Vec::new(),
        }
    }

    /// Appends a step.
    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends a plan-level receipt path.
    #[must_use]
    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipts.push(receipt.into());
        self
    }

    /// Looks up a step by id.
    #[must_use]
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    /// The first step that is not done, in document order.
    #[must_use]
    pub fn next_open_step(&self) -> Option<&Step> {
        self.steps.iter().find(|step| !step.status.is_done())
    }

    /// Checks the structural invariants.
    pub fn validate_structure(&self) -> Result<(), PlanError> {
        let mut seen = std::collections::BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(PlanError::DuplicateStepId {
                    plan_id: self.plan_id.clone(),
                    step_id: step.id.clone(),
                });
            }
        }
        let in_progress = self
            .steps
            .iter()
            .filter(|step| step.status == PlanState::InProgress)
            .count();
        if in_progress > 1 {
            return Err(PlanError::MultipleStepsInProgress {
                plan_id: self.plan_id.clone(),
                count: in_progress,
            });
        }
        if self.checkpoint.description.trim().is_empty() {
            return Err(PlanError::CheckpointIncomplete {
                plan_id: self.plan_id.clone(),
                field: "description",
            });
        }
        if self.checkpoint.owner.trim().is_empty() {
            return Err(PlanError::CheckpointIncomplete {
                plan_id: self.plan_id.clone(),
                field: "owner",
            });
        }
        Ok(())
    }
}

/// Moves a plan to `new_status` through the transition table.
pub fn set_plan_status(
    store: &RecordStore,
    plan_id: &str,
    new_status: PlanState,
) -> Result<Plan, PlanError> {
    let mut plan = load_plan(store, plan_id)?;
    machine::ensure_transition(plan.status, new_status)?;
    plan.status = new_status;
    plan.validate_structure()?;
    store.save_plan(&plan)?;
    tracing::debug!(plan_id = %plan_id, status = new_status.as_str(), "plan status set");
    Ok(plan)
}

/// Moves one step to `new_status` through the transition table.
///
/// A non-empty `note` is appended to the step's accumulated notes.
pub fn set_step_status(
    store: &RecordStore,
    plan_id: &str,
    step_id: &str,
    new_status: PlanState,
    note: Option<&str>,
) -> Result<Plan, PlanError> {
    let mut plan = load_plan(store, plan_id)?;
    let step = plan
        .steps
        .iter_mut()
        .find(|step| step.id == step_id)
        .ok_or_else(|| PlanError::StepNotFound {
            plan_id: plan_id.to_string(),
            step_id: step_id.to_string(),
        })?;
    machine::ensure_transition(step.status, new_status)?;
    step.status = new_status;
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        if !step.notes.is_empty() {
            step.notes.push('\n');
        }
        step.notes.push_str(note);
    }
    plan.validate_structure()?;
    store.save_plan(&plan)?;
    tracing::debug!(
        plan_id = %plan_id,
        step_id = %step_id,
        status = new_status.as_str(),
        "step status set"
    );
    Ok(plan)
}

fn load_plan(store: &RecordStore, plan_id: &str) -> Result<Plan, PlanError> {
    store.load_plan(plan_id)?.ok_or_else(|| PlanError::PlanNotFound {
        plan_id: plan_id.to_string(),
    })
}
