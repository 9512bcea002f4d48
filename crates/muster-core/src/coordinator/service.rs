//! Backlog loop and round-based supervision.
//!
//! The backlog is a JSON array of items maintained outside this crate.
//! [`run_loop`] walks it, orchestrating the first eligible item per
//! iteration. [`supervise`] runs single-iteration loops for a roster of
//! workers, round by round, until the backlog drains, the round budget
//! runs out, or a worker cycle comes back non-zero.
//!
//! Nothing here retries: a failed cycle stops the loop, a failed loop
//! stops the round and the service. Picking up again is an explicit new
//! invocation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::orchestrator::{self, ClaimSpec, OrchestratorRequest};
use super::{CoordinatorError, CycleDeps, exit_codes};
use crate::agent;
use crate::session;
use crate::store;

/// Schema tag written into round receipts.
pub const ROUND_RECEIPT_SCHEMA: &str = "muster.service_round.v1";

/// Lifecycle status of one backlog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklogStatus {
    Pending,
    Queued,
    InProgress,
    Done,
    Dropped,
}

impl BacklogStatus {
    /// Whether the item still wants work.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::InProgress)
    }
}

/// One entry in the backlog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BacklogItem {
    pub id: String,
    pub status: BacklogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl BacklogItem {
    /// Creates an item without a plan reference.
    #[must_use]
    pub fn new(id: impl Into<String>, status: BacklogStatus) -> Self {
        Self {
            id: id.into(),
            status,
            plan_id: None,
            notes: None,
        }
    }

    /// Attaches the plan this item executes.
    #[must_use]
    pub fn with_plan(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    /// Attaches free-form notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Reads the backlog document.
pub fn load_backlog(path: &Path) -> Result<Vec<BacklogItem>, CoordinatorError> {
    store::read_json_document(path)?.ok_or_else(|| CoordinatorError::BacklogMissing {
        path: path.to_path_buf(),
    })
}

/// Configuration for one backlog loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub backlog_path: PathBuf,
    /// Agent the loop claims and executes as.
    pub worker_agent: String,
    /// Maximum orchestrations before the loop returns.
    pub iterations: u32,
    /// Pause between iterations.
    pub sleep: Duration,
    /// Whether to take the item's claim before each cycle.
    pub claim_tasks: bool,
    pub max_session_age: Option<u64>,
}

impl LoopConfig {
    /// A single-iteration loop that claims tasks and never sleeps.
    #[must_use]
    pub fn new(backlog_path: impl Into<PathBuf>, worker_agent: impl Into<String>) -> Self {
        Self {
            backlog_path: backlog_path.into(),
            worker_agent: worker_agent.into(),
            iterations: 1,
            sleep: Duration::ZERO,
            claim_tasks: true,
            max_session_age: None,
        }
    }

    /// Sets the iteration budget.
    #[must_use]
    pub const fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Sets the pause between iterations.
    #[must_use]
    pub const fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    /// Sets whether items are claimed before their cycles.
    #[must_use]
    pub const fn with_claim_tasks(mut self, claim_tasks: bool) -> Self {
        self.claim_tasks = claim_tasks;
        self
    }

    /// Overrides the session freshness window.
    #[must_use]
    pub const fn with_max_session_age(mut self, secs: u64) -> Self {
        self.max_session_age = Some(secs);
        self
    }
}

/// One orchestrated backlog item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationResult {
    pub item_id: String,
    pub plan_id: String,
    pub step_id: String,
    pub exit_code: u8,
}

/// What a backlog loop did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoopSummary {
    pub iterations_run: u32,
    pub results: Vec<IterationResult>,
    /// A non-zero cycle stopped the loop early.
    pub aborted: bool,
    /// A scan found no eligible work.
    pub drained: bool,
}

/// Walks the backlog, orchestrating the first eligible item per
/// iteration.
///
/// Eligible means an open status, a plan reference, and a plan on disk
/// with at least one non-done step; items whose plan is missing or
/// exhausted are skipped. Items are considered in document order. Any
/// non-zero cycle stops the loop immediately.
pub fn run_loop(
    deps: &CycleDeps<'_>,
    config: &LoopConfig,
) -> Result<LoopSummary, CoordinatorError> {
    let mut summary = LoopSummary::default();
    for iteration in 0..config.iterations {
        if iteration > 0 && !config.sleep.is_zero() {
            std::thread::sleep(config.sleep);
        }
        let now = Utc::now();
        let Some((item, plan_id, step_id)) = next_eligible(deps, &config.backlog_path)? else {
            summary.drained = true;
            tracing::debug!(iterations = summary.iterations_run, "no eligible backlog items");
            break;
        };

        let mut request = OrchestratorRequest::new(plan_id.as_str(), step_id.as_str());
        if config.claim_tasks {
            request = request
                .with_claim(ClaimSpec::new(item.id.as_str(), config.worker_agent.as_str()));
        }
        if let Some(secs) = config.max_session_age {
            request = request.with_max_session_age(secs);
        }
        tracing::debug!(
            item_id = %item.id,
            plan_id = %plan_id,
            step_id = %step_id,
            agent_id = %config.worker_agent,
            "orchestrating backlog item"
        );
        let outcome = orchestrator::orchestrate(deps, &request, now)?;
        let exit_code = outcome.exit_code();

        summary.iterations_run += 1;
        summary.results.push(IterationResult {
            item_id: item.id,
            plan_id,
            step_id,
            exit_code,
        });
        if exit_code != exit_codes::SUCCESS {
            summary.aborted = true;
            tracing::warn!(exit_code, "cycle came back non-zero, loop aborted");
            break;
        }
    }
    Ok(summary)
}

/// Finds the first open item whose plan still has work.
fn next_eligible(
    deps: &CycleDeps<'_>,
    backlog_path: &Path,
) -> Result<Option<(BacklogItem, String, String)>, CoordinatorError> {
    for item in load_backlog(backlog_path)? {
        if !item.status.is_open() {
            continue;
        }
        let Some(plan_id) = item.plan_id.clone() else {
            continue;
        };
        let Some(plan) = deps.store.load_plan(&plan_id)? else {
            tracing::debug!(item_id = %item.id, plan_id = %plan_id, "plan missing, item skipped");
            continue;
        };
        let Some(step) = plan.next_open_step() else {
            tracing::debug!(item_id = %item.id, plan_id = %plan_id, "plan exhausted, item skipped");
            continue;
        };
        let step_id = step.id.clone();
        return Ok(Some((item, plan_id, step_id)));
    }
    Ok(None)
}

/// Configuration for the outer supervisor.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub backlog_path: PathBuf,
    /// Worker identities, one single-iteration loop each per round.
    pub workers: Vec<String>,
    /// Round budget; `None` runs until the backlog drains or a worker
    /// fails.
    pub max_rounds: Option<u32>,
    /// Pause between rounds.
    pub sleep: Duration,
    /// Whether to write a receipt after each round.
    pub round_receipts: bool,
    pub claim_tasks: bool,
    pub max_session_age: Option<u64>,
}

impl ServiceConfig {
    /// An unbounded service with no workers and receipts disabled.
    #[must_use]
    pub fn new(backlog_path: impl Into<PathBuf>) -> Self {
        Self {
            backlog_path: backlog_path.into(),
            workers: Vec::new(),
            max_rounds: None,
            sleep: Duration::ZERO,
            round_receipts: false,
            claim_tasks: true,
            max_session_age: None,
        }
    }

    /// Adds a worker to the roster.
    #[must_use]
    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.workers.push(worker.into());
        self
    }

    /// Bounds the number of rounds.
    #[must_use]
    pub const fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    /// Sets the pause between rounds.
    #[must_use]
    pub const fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    /// Enables or disables per-round receipts.
    #[must_use]
    pub const fn with_round_receipts(mut self, enabled: bool) -> Self {
        self.round_receipts = enabled;
        self
    }

    /// Sets whether loops claim items before their cycles.
    #[must_use]
    pub const fn with_claim_tasks(mut self, claim_tasks: bool) -> Self {
        self.claim_tasks = claim_tasks;
        self
    }

    /// Overrides the session freshness window.
    #[must_use]
    pub const fn with_max_session_age(mut self, secs: u64) -> Self {
        self.max_session_age = Some(secs);
        self
    }
}

/// Why the supervisor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStop {
    /// The round budget was used up.
    RoundsComplete,
    /// An unbounded run finished a full round with no work found.
    BacklogDrained,
    /// A worker's cycle came back non-zero; nothing after it ran.
    WorkerFailed { worker: String, exit_code: u8 },
}

/// What a supervision run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSummary {
    pub rounds_run: u32,
    pub stop: ServiceStop,
}

impl ServiceSummary {
    /// Exit code for the whole supervision run.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match &self.stop {
            ServiceStop::RoundsComplete | ServiceStop::BacklogDrained => exit_codes::SUCCESS,
            ServiceStop::WorkerFailed { exit_code, .. } => *exit_code,
        }
    }
}

/// Per-worker slice of a round receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerRoundReport {
    pub worker: String,
    pub iterations_run: u32,
    pub aborted: bool,
}

/// Durable record of one supervision round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoundReceipt {
    pub schema: String,
    pub round: u32,
    pub ts: DateTime<Utc>,
    pub workers: Vec<WorkerRoundReport>,
}

/// Supervises backlog loops for a roster of workers.
///
/// Each round re-checks the manager's session freshness, then runs one
/// single-iteration loop per worker in roster order. A worker cycle
/// exiting non-zero stops the round right there: workers after it do
/// not run, and the service stops with that failure. Unbounded runs
/// stop after the first round in which no worker found work; bounded
/// runs sleep through empty rounds until the budget is spent.
pub fn supervise(
    deps: &CycleDeps<'_>,
    config: &ServiceConfig,
) -> Result<ServiceSummary, CoordinatorError> {
    let manager = match deps.manager {
        Some(id) => id.to_string(),
        None => agent::resolve_manager(deps.store)?.ok_or(CoordinatorError::ManagerUnresolved)?,
    };

    let mut rounds_run = 0u32;
    loop {
        if let Some(max) = config.max_rounds {
            if rounds_run >= max {
                return Ok(ServiceSummary {
                    rounds_run,
                    stop: ServiceStop::RoundsComplete,
                });
            }
        }
        if rounds_run > 0 && !config.sleep.is_zero() {
            std::thread::sleep(config.sleep);
        }
        let round = rounds_run + 1;

        session::ensure_recent(
            deps.workspace,
            deps.journal,
            &manager,
            config.max_session_age,
            deps.overrides,
            Utc::now(),
        )?;

        let mut reports = Vec::new();
        let mut failed = None;
        let mut worked = false;
        for worker in &config.workers {
            let mut loop_config = LoopConfig::new(&config.backlog_path, worker.as_str())
                .with_claim_tasks(config.claim_tasks);
            if let Some(secs) = config.max_session_age {
                loop_config = loop_config.with_max_session_age(secs);
            }
            let summary = run_loop(deps, &loop_config)?;
            worked |= summary.iterations_run > 0;
            reports.push(WorkerRoundReport {
                worker: worker.clone(),
                iterations_run: summary.iterations_run,
                aborted: summary.aborted,
            });
            if summary.aborted {
                let exit_code = summary
                    .results
                    .last()
                    .map_or(exit_codes::BREAKER_TRIPPED, |r| r.exit_code);
                failed = Some(ServiceStop::WorkerFailed {
                    worker: worker.clone(),
                    exit_code,
                });
                break;
            }
        }
        rounds_run = round;

        if config.round_receipts {
            write_round_receipt(deps, round, &reports)?;
        }

        if let Some(stop) = failed {
            tracing::warn!(round, "worker failed, service stopped");
            return Ok(ServiceSummary { rounds_run, stop });
        }
        if config.max_rounds.is_none() && !worked {
            tracing::debug!(round, "full round without work, service stopped");
            return Ok(ServiceSummary {
                rounds_run,
                stop: ServiceStop::BacklogDrained,
            });
        }
    }
}

fn write_round_receipt(
    deps: &CycleDeps<'_>,
    round: u32,
    workers: &[WorkerRoundReport],
) -> Result<PathBuf, CoordinatorError> {
    let now = Utc::now();
    let receipt = RoundReceipt {
        schema: ROUND_RECEIPT_SCHEMA.to_string(),
        round,
        ts: now,
        workers: workers.to_vec(),
    };
    let name = format!("round-{round}-{}.json", now.format("%Y%m%dT%H%M%SZ"));
    let path = deps
        .workspace
        .coordinator_receipts_dir()
        .join("rounds")
        .join(name);
    store::write_json_document(&path, &receipt)?;
    tracing::debug!(round, path = %path.display(), "round receipt written");
    Ok(path)
}
