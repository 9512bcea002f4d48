//! Coordinator: guarded execution of plan steps.
//!
//! Four layers, each wrapping the one below:
//!
//! - [`guard`] runs one fully guarded cycle for a (plan, step) pair and
//!   owns the circuit breaker.
//! - [`orchestrator`] optionally claims the backing task, then runs the
//!   guard with execution enabled.
//! - [`service::run_loop`] walks an external backlog and orchestrates one
//!   eligible item per iteration.
//! - [`service::supervise`] is the outer supervisor, running loops for a
//!   roster of workers round by round.
//!
//! The coordinator talks to the outside world through three collaborator
//! traits: a readiness evaluator, a scan trigger, and a worker harness.
//! Implementations live with the caller; tests substitute stubs.
//!
//! Exit code convention: 0 success, 1 guard or validation failure,
//! 2 circuit breaker tripped.

pub mod breaker;
mod error;
pub mod guard;
pub mod manifest;
pub mod orchestrator;
pub mod service;

pub use breaker::{BreakerFault, CircuitBreaker};
pub use error::CoordinatorError;
pub use guard::{CoordinatorState, CycleOutcome, CycleRequest};
pub use manifest::StepManifest;
pub use orchestrator::{ClaimSpec, OrchestratorOutcome, OrchestratorRequest};
pub use service::{
    BacklogItem, BacklogStatus, LoopConfig, LoopSummary, ServiceConfig, ServiceStop,
    ServiceSummary,
};

use serde::{Deserialize, Serialize};

use crate::config::Workspace;
use crate::journal::Journal;
use crate::plan::{Plan, Step};
use crate::policy::Override;
use crate::store::RecordStore;

/// Process exit codes used across the coordinator surface.
pub mod exit_codes {
    /// Cycle completed and the breaker stayed inactive.
    pub const SUCCESS: u8 = 0;
    /// A guard or validation failure stopped the cycle.
    pub const GUARD_FAILURE: u8 = 1;
    /// Cycle completed with the circuit breaker tripped.
    pub const BREAKER_TRIPPED: u8 = 2;
}

/// Synthesized description of one step, fed to the readiness evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskBrief {
    pub plan_id: String,
    pub step_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub systemic_targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layer_targets: Vec<String>,
}

impl TaskBrief {
    /// Builds a brief for `step` within `plan`.
    #[must_use]
    pub fn from_step(plan: &Plan, step: &Step) -> Self {
        Self {
            plan_id: plan.plan_id.clone(),
            step_id: step.id.clone(),
            title: step.title.clone(),
            notes: step.notes.clone(),
            systemic_targets: plan.systemic_targets.clone(),
            layer_targets: plan.layer_targets.clone(),
        }
    }
}

/// Verdict of the readiness evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessVerdict {
    /// Clear to execute.
    Ready,
    /// Needs human review before execution.
    Review,
    /// Execution is withheld.
    Hold,
}

impl ReadinessVerdict {
    /// Returns the wire representation of this verdict.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Review => "review",
            Self::Hold => "hold",
        }
    }

    /// Whether execution may proceed.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Readiness evaluation result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemicReadiness {
    pub verdict: ReadinessVerdict,
    /// Aggregate score reported by the evaluator.
    pub total: f64,
}

impl SystemicReadiness {
    /// Creates a readiness result.
    #[must_use]
    pub const fn new(verdict: ReadinessVerdict, total: f64) -> Self {
        Self { verdict, total }
    }
}

/// Judges whether a step is systemically safe to execute.
pub trait ReadinessEvaluator {
    /// Assesses `brief`; an `Err` aborts the cycle, a non-ready verdict
    /// trips the breaker.
    fn assess(&self, brief: &TaskBrief) -> Result<SystemicReadiness, CoordinatorError>;
}

/// When a scan-trigger check runs relative to worker execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Pre,
    Post,
}

impl ScanPhase {
    /// Returns the wire representation of this phase.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }
}

/// Result status of a scan-trigger check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Nothing blocking found.
    Clear,
    /// The scan flagged a problem (or could not run); trips the breaker.
    Error,
}

/// Outcome of one scan-trigger check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanOutcome {
    pub status: ScanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ScanOutcome {
    /// A clean scan.
    #[must_use]
    pub const fn clear() -> Self {
        Self {
            status: ScanStatus::Clear,
            detail: None,
        }
    }

    /// A failed scan with a reason.
    #[must_use]
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: ScanStatus::Error,
            detail: Some(detail.into()),
        }
    }

    /// Whether the scan flagged a problem.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.status, ScanStatus::Error)
    }
}

/// Runs workspace scans around worker execution.
///
/// Scan failures are expressed as [`ScanStatus::Error`], never as a
/// panic or process abort; the breaker decides what happens next.
pub trait ScanTrigger {
    /// Runs the check for `phase`.
    fn check(&self, phase: ScanPhase) -> ScanOutcome;
}

/// Result of one worker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOutcome {
    /// Process exit code; zero is success.
    pub exit_code: i32,
}

/// Executes the actual work described by a step manifest.
pub trait WorkerHarness {
    /// Runs the worker. `Err` means the harness could not launch it;
    /// a launched worker that fails reports through `exit_code`.
    fn execute(&self, manifest: &StepManifest) -> Result<WorkerOutcome, CoordinatorError>;
}

/// Everything a coordinator cycle needs, borrowed from the caller.
///
/// Constructed once per invocation; nothing here is global.
pub struct CycleDeps<'a> {
    pub workspace: &'a Workspace,
    pub store: &'a RecordStore,
    pub journal: &'a Journal,
    pub evaluator: &'a dyn ReadinessEvaluator,
    pub scanner: &'a dyn ScanTrigger,
    pub worker: &'a dyn WorkerHarness,
    pub overrides: &'a Override,
    /// Acting manager identity; resolved from records when `None`.
    pub manager: Option<&'a str>,
}

/// Stub collaborators and workspace fixtures shared by the coordinator
/// test modules.
#[cfg(test)]
pub(crate) mod test_helpers {
    use std::cell::Cell;

    use chrono::{DateTime, TimeZone, Utc};

    use super::manifest::StepManifest;
    use super::{
        CoordinatorError, CycleDeps, ReadinessEvaluator, ReadinessVerdict, ScanOutcome,
        ScanPhase, ScanTrigger, SystemicReadiness, TaskBrief, WorkerHarness, WorkerOutcome,
    };
    use crate::agent::{AgentManifest, AgentRole};
    use crate::config::{Workspace, WorkspaceConfig};
    use crate::journal::Journal;
    use crate::plan::{Checkpoint, Plan, Step};
    use crate::policy::Override;
    use crate::session;
    use crate::store::RecordStore;

    pub struct Fixture {
        pub dir: tempfile::TempDir,
        pub ws: Workspace,
        pub store: RecordStore,
        pub journal: Journal,
    }

    pub fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::resolve(dir.path(), &WorkspaceConfig::default());
        let store = RecordStore::new(&ws);
        let journal = Journal::new(&ws);
        Fixture {
            dir,
            ws,
            store,
            journal,
        }
    }

    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    pub fn seed_manager(fx: &Fixture, booted_at: DateTime<Utc>) {
        fx.store
            .save_manifest(&AgentManifest::new("codex-m").with_role(AgentRole::Manager))
            .unwrap();
        session::record_boot(&fx.ws, "codex-m", booted_at).unwrap();
    }

    pub fn seed_plan(fx: &Fixture, plan_id: &str, step_id: &str) {
        let plan = Plan::new(plan_id, Checkpoint::new("step reviewed", "codex-m"))
            .with_step(Step::new(step_id, "implement the codec"));
        fx.store.save_plan(&plan).unwrap();
    }

    pub fn deps<'a>(
        fx: &'a Fixture,
        evaluator: &'a dyn ReadinessEvaluator,
        scanner: &'a dyn ScanTrigger,
        worker: &'a dyn WorkerHarness,
        overrides: &'a Override,
    ) -> CycleDeps<'a> {
        CycleDeps {
            workspace: &fx.ws,
            store: &fx.store,
            journal: &fx.journal,
            evaluator,
            scanner,
            worker,
            overrides,
            manager: None,
        }
    }

    pub struct FixedEvaluator(pub SystemicReadiness);

    impl ReadinessEvaluator for FixedEvaluator {
        fn assess(&self, _brief: &TaskBrief) -> Result<SystemicReadiness, CoordinatorError> {
            Ok(self.0)
        }
    }

    pub fn ready_evaluator() -> FixedEvaluator {
        FixedEvaluator(SystemicReadiness::new(ReadinessVerdict::Ready, 92.5))
    }

    pub struct FixedScanner {
        pub pre: ScanOutcome,
        pub post: ScanOutcome,
    }

    impl FixedScanner {
        pub fn clear() -> Self {
            Self {
                pre: ScanOutcome::clear(),
                post: ScanOutcome::clear(),
            }
        }
    }

    impl ScanTrigger for FixedScanner {
        fn check(&self, phase: ScanPhase) -> ScanOutcome {
            match phase {
                ScanPhase::Pre => self.pre.clone(),
                ScanPhase::Post => self.post.clone(),
            }
        }
    }

    pub struct CountingWorker {
        pub exit_code: i32,
        pub calls: Cell<u32>,
    }

    impl CountingWorker {
        pub fn with_exit(exit_code: i32) -> Self {
            Self {
                exit_code,
                calls: Cell::new(0),
            }
        }
    }

    impl WorkerHarness for CountingWorker {
        fn execute(&self, _manifest: &StepManifest) -> Result<WorkerOutcome, CoordinatorError> {
            self.calls.set(self.calls.get() + 1);
            Ok(WorkerOutcome {
                exit_code: self.exit_code,
            })
        }
    }
}
