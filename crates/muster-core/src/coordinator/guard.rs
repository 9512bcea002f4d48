//! One guarded coordinator cycle.
//!
//! A cycle walks a fixed sequence for a (plan, step) pair:
//!
//! 1. Resolve the manager agent and check its session freshness.
//! 2. Load the plan and select the step.
//! 3. Build and persist the step manifest.
//! 4. Assess systemic readiness; a non-ready verdict trips the breaker.
//! 5. Run the pre-execution scan; an error status trips the breaker.
//! 6. Invoke the worker harness, but only when execution was requested
//!    and the breaker is still quiet. A tripped breaker prevents the
//!    invocation entirely.
//! 7. Run the post-execution scan, but only when the worker actually ran.
//! 8. Persist the cycle state receipt and emit a status event.
//!
//! The breaker holds the first cause only. Steps 1 and 2 fail the cycle
//! outright (exit 1 territory); everything after runs to completion and
//! reports through the receipt, exiting 0 or 2.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::breaker::{BreakerFault, CircuitBreaker};
use super::manifest::StepManifest;
use super::{
    CoordinatorError, CycleDeps, ScanOutcome, ScanPhase, SystemicReadiness, TaskBrief, exit_codes,
};
use crate::agent;
use crate::claim::guard as claim_guard;
use crate::journal::{EventKind, EventRecord, Severity};
use crate::plan::PlanError;
use crate::session;
use crate::store;

/// Schema tag written into every cycle state receipt.
pub const COORDINATOR_STATE_SCHEMA: &str = "muster.coordinator_cycle.v1";

/// Parameters for one coordinator cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleRequest {
    pub plan_id: String,
    pub step_id: String,
    /// Whether the worker harness may actually run.
    pub execute: bool,
    /// Caller override for the manager session freshness window.
    pub max_session_age: Option<u64>,
}

impl CycleRequest {
    /// A cycle request with execution disabled.
    #[must_use]
    pub fn new(plan_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            step_id: step_id.into(),
            execute: false,
            max_session_age: None,
        }
    }

    /// Sets whether the worker harness may run.
    #[must_use]
    pub const fn with_execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }

    /// Overrides the session freshness window for this cycle.
    #[must_use]
    pub const fn with_max_session_age(mut self, secs: u64) -> Self {
        self.max_session_age = Some(secs);
        self
    }
}

/// What the worker harness did during the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerReport {
    /// Whether the harness was invoked at all.
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Breaker outcome recorded in the state receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerReport {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Durable record of one completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorState {
    pub schema: String,
    pub ts: DateTime<Utc>,
    pub manager_agent: String,
    pub plan_id: String,
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systemic: Option<SystemicReadiness>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_scan: Option<ScanOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_scan: Option<ScanOutcome>,
    pub worker: WorkerReport,
    pub circuit_breaker: BreakerReport,
}

/// A completed cycle: its durable state plus the process exit code.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub state: CoordinatorState,
    /// Where the state receipt was written.
    pub receipt_path: PathBuf,
    /// 0 when the breaker stayed quiet, 2 when it tripped.
    pub exit_code: u8,
}

impl CycleOutcome {
    /// Whether the circuit breaker tripped during the cycle.
    #[must_use]
    pub const fn breaker_tripped(&self) -> bool {
        self.state.circuit_breaker.active
    }
}

/// Runs one fully guarded cycle.
///
/// Guard failures (unresolved manager, stale session, missing plan or
/// step) return an error; a completed cycle always persists its state
/// receipt and status event, whether or not the breaker tripped.
pub fn run_cycle(
    deps: &CycleDeps<'_>,
    request: &CycleRequest,
    now: DateTime<Utc>,
) -> Result<CycleOutcome, CoordinatorError> {
    let manager = match deps.manager {
        Some(id) => id.to_string(),
        None => agent::resolve_manager(deps.store)?.ok_or(CoordinatorError::ManagerUnresolved)?,
    };
    session::ensure_recent(
        deps.workspace,
        deps.journal,
        &manager,
        request.max_session_age,
        deps.overrides,
        now,
    )?;

    let plan = deps.store.load_plan(&request.plan_id)?.ok_or_else(|| {
        PlanError::PlanNotFound {
            plan_id: request.plan_id.clone(),
        }
    })?;
    let step = plan
        .step(&request.step_id)
        .ok_or_else(|| CoordinatorError::StepNotFound {
            plan_id: request.plan_id.clone(),
            step_id: request.step_id.clone(),
        })?;

    let manifest = StepManifest::build(&plan, step, &manager, now);
    let manifest_path = manifest.persist(deps.workspace)?;
    tracing::debug!(
        plan_id = %request.plan_id,
        step_id = %request.step_id,
        path = %manifest_path.display(),
        "step manifest persisted"
    );

    let mut breaker = CircuitBreaker::new();

    let readiness = deps.evaluator.assess(&TaskBrief::from_step(&plan, step))?;
    if !readiness.verdict.is_ready() {
        breaker.record(BreakerFault::SystemicVerdict {
            verdict: readiness.verdict,
        });
    }

    let pre_scan = deps.scanner.check(ScanPhase::Pre);
    if pre_scan.is_error() {
        breaker.record(BreakerFault::PreScanError);
    }

    let mut worker = WorkerReport {
        executed: false,
        exit_code: None,
    };
    if request.execute && !breaker.is_tripped() {
        let outcome = deps.worker.execute(&manifest)?;
        worker.executed = true;
        worker.exit_code = Some(outcome.exit_code);
        if outcome.exit_code != 0 {
            breaker.record(BreakerFault::WorkerExit {
                code: outcome.exit_code,
            });
        }
    }

    let post_scan = if worker.executed {
        let outcome = deps.scanner.check(ScanPhase::Post);
        if outcome.is_error() {
            breaker.record(BreakerFault::PostScanError);
        }
        Some(outcome)
    } else {
        None
    };

    let state = CoordinatorState {
        schema: COORDINATOR_STATE_SCHEMA.to_string(),
        ts: now,
        manager_agent: manager.clone(),
        plan_id: request.plan_id.clone(),
        step_id: request.step_id.clone(),
        systemic: Some(readiness),
        pre_scan: Some(pre_scan),
        post_scan,
        worker,
        circuit_breaker: BreakerReport {
            active: breaker.is_tripped(),
            reason: breaker.reason(),
        },
    };

    let receipt_name = format!(
        "cycle-{}-{}-{}.json",
        request.plan_id,
        request.step_id,
        now.format("%Y%m%dT%H%M%SZ")
    );
    let receipt_path = deps
        .workspace
        .coordinator_receipts_dir()
        .join(receipt_name);
    store::write_json_document(&receipt_path, &state)?;

    let summary = match state.circuit_breaker.reason.as_deref() {
        Some(reason) => format!(
            "cycle {}/{} tripped: {reason}",
            request.plan_id, request.step_id
        ),
        None => format!("cycle {}/{} complete", request.plan_id, request.step_id),
    };
    let severity = if state.circuit_breaker.active {
        Severity::High
    } else {
        Severity::Info
    };
    let event = EventRecord::new(now, &manager, EventKind::Status, summary)
        .with_plan(&request.plan_id)
        .with_receipt(receipt_path.display().to_string())
        .with_severity(severity);
    claim_guard::log_event(deps.store, deps.journal, &event)?;

    let exit_code = if state.circuit_breaker.active {
        exit_codes::BREAKER_TRIPPED
    } else {
        exit_codes::SUCCESS
    };
    tracing::debug!(
        plan_id = %request.plan_id,
        step_id = %request.step_id,
        exit_code,
        breaker = state.circuit_breaker.active,
        "coordinator cycle complete"
    );
    Ok(CycleOutcome {
        state,
        receipt_path,
        exit_code,
    })
}
