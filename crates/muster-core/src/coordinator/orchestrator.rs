//! Claim-then-run orchestration of a single step.
//!
//! The orchestrator wraps one guard cycle with execution enabled,
//! optionally taking the backing task's claim for the executing agent
//! first. A failed claim aborts before any cycle side effect. Dry runs
//! report the planned cycle and touch nothing.

use std::fmt;

use chrono::{DateTime, Utc};

use super::guard::{self, CycleOutcome, CycleRequest};
use super::{CoordinatorError, CycleDeps, exit_codes};
use crate::claim::{self, ClaimRequest};

/// Claim to take on behalf of the executing agent before the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSpec {
    pub task_id: String,
    pub agent_id: String,
    pub branch: Option<String>,
}

impl ClaimSpec {
    /// Creates a claim spec without a branch.
    #[must_use]
    pub fn new(task_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            branch: None,
        }
    }

    /// Attaches a working branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Parameters for one orchestrated step execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorRequest {
    pub plan_id: String,
    pub step_id: String,
    /// Claim to take before the cycle, if any.
    pub claim: Option<ClaimSpec>,
    /// Report the planned cycle instead of running it.
    pub dry_run: bool,
    pub max_session_age: Option<u64>,
}

impl OrchestratorRequest {
    /// A request with no claim and dry run disabled.
    #[must_use]
    pub fn new(plan_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            step_id: step_id.into(),
            claim: None,
            dry_run: false,
            max_session_age: None,
        }
    }

    /// Claims `spec` before the cycle runs.
    #[must_use]
    pub fn with_claim(mut self, spec: ClaimSpec) -> Self {
        self.claim = Some(spec);
        self
    }

    /// Switches to a dry run with no side effects.
    #[must_use]
    pub const fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Overrides the session freshness window.
    #[must_use]
    pub const fn with_max_session_age(mut self, secs: u64) -> Self {
        self.max_session_age = Some(secs);
        self
    }
}

/// The cycle a dry run would have executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCycle {
    pub plan_id: String,
    pub step_id: String,
    pub claim: Option<ClaimSpec>,
}

impl fmt::Display for PlannedCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "would run cycle {}/{}", self.plan_id, self.step_id)?;
        if let Some(claim) = &self.claim {
            write!(f, ", claiming {} as {}", claim.task_id, claim.agent_id)?;
        }
        Ok(())
    }
}

/// Result of an orchestrator invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorOutcome {
    /// Dry run: what would have happened.
    Planned(PlannedCycle),
    /// The cycle ran to completion.
    Executed(CycleOutcome),
}

impl OrchestratorOutcome {
    /// Exit code for the invocation. A dry run always succeeds.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Planned(_) => exit_codes::SUCCESS,
            Self::Executed(outcome) => outcome.exit_code,
        }
    }
}

/// Claims the backing task when requested, then runs one cycle with
/// execution enabled.
pub fn orchestrate(
    deps: &CycleDeps<'_>,
    request: &OrchestratorRequest,
    now: DateTime<Utc>,
) -> Result<OrchestratorOutcome, CoordinatorError> {
    if request.dry_run {
        let planned = PlannedCycle {
            plan_id: request.plan_id.clone(),
            step_id: request.step_id.clone(),
            claim: request.claim.clone(),
        };
        tracing::debug!(planned = %planned, "dry run requested, no side effects");
        return Ok(OrchestratorOutcome::Planned(planned));
    }

    if let Some(spec) = &request.claim {
        let mut claim_request = ClaimRequest::new(spec.task_id.as_str(), spec.agent_id.as_str())
            .with_plan(request.plan_id.as_str());
        if let Some(branch) = &spec.branch {
            claim_request = claim_request.with_branch(branch.as_str());
        }
        claim::claim_task(deps.store, deps.journal, &claim_request, deps.overrides, now)?;
    }

    let mut cycle = CycleRequest::new(request.plan_id.as_str(), request.step_id.as_str())
        .with_execute(true);
    if let Some(secs) = request.max_session_age {
        cycle = cycle.with_max_session_age(secs);
    }
    let outcome = guard::run_cycle(deps, &cycle, now)?;
    Ok(OrchestratorOutcome::Executed(outcome))
}
