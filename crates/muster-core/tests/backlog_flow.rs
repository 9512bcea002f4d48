//! End-to-end tests for the coordination workflow.
//!
//! These run the crate the way a small agent fleet would, through the
//! public API only:
//!
//! - Claiming a task and watching the claim shield its owner
//! - Terminal release reopening the record for everyone
//! - A supervised service draining a seeded backlog through real plans
//! - A systemic hold stopping a round before the worker is invoked
//! - The conflict and heartbeat monitors reading the records the
//!   working agents left behind
//!
//! # Test Architecture
//!
//! Every test boots a throwaway workspace and drives it end to end:
//!
//! ```text
//! backlog.json          records/plans/PLAN-*.json
//!      |                        |
//!      v                        v
//! supervise ---> run_loop ---> orchestrate ---> run_cycle
//!                                  |                |
//!                         records/claims/*.json     |
//!                                       receipts/coordinator/*
//!                                       journal/events.jsonl
//! ```

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};

use muster_core::agent::{AgentManifest, AgentRole};
use muster_core::claim::{
    Assignment, ClaimError, ClaimRequest, ClaimStatus, claim_task, guard, release_task,
};
use muster_core::config::{Workspace, WorkspaceConfig};
use muster_core::conflict::{self, ConflictSeverity};
use muster_core::coordinator::service::{
    BacklogItem, BacklogStatus, RoundReceipt, ServiceConfig, ServiceStop, supervise,
};
use muster_core::coordinator::{
    CoordinatorError, CoordinatorState, CycleDeps, ReadinessEvaluator, ReadinessVerdict,
    ScanOutcome, ScanPhase, ScanTrigger, StepManifest, SystemicReadiness, TaskBrief,
    WorkerHarness, WorkerOutcome, exit_codes,
};
use muster_core::heartbeat::{self, AlertKind, HeartbeatReport, HeartbeatWindows};
use muster_core::journal::{
    AuditKind, EventKind, EventRecord, GuardKind, Journal, MessageKind, OPS_CHANNEL, Severity,
};
use muster_core::plan::{Checkpoint, Plan, PlanState, Step, set_step_status};
use muster_core::policy::{ConflictPolicy, Override};
use muster_core::session;
use muster_core::store::{RecordStore, read_json_document, write_json_document};

// ============================================================================
// Test Helpers
// ============================================================================

/// A workspace rooted in a throwaway directory, with the handles every
/// scenario needs.
struct Fleet {
    ws: Workspace,
    store: RecordStore,
    journal: Journal,
    _dir: tempfile::TempDir,
}

/// Boots a fresh workspace with the default layout.
fn fleet() -> Fleet {
    let dir = tempfile::tempdir().unwrap();
    let ws = Workspace::resolve(dir.path(), &WorkspaceConfig::default());
    ws.ensure_layout().unwrap();
    let store = RecordStore::new(&ws);
    let journal = Journal::new(&ws);
    Fleet {
        ws,
        store,
        journal,
        _dir: dir,
    }
}

/// A fixed reference instant, away from any clock edge.
fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
}

/// Registers `id` as a manager and records a boot receipt at `booted_at`.
fn register_manager(f: &Fleet, id: &str, booted_at: DateTime<Utc>) {
    let manifest = AgentManifest::new(id).with_role(AgentRole::Manager);
    f.store.save_manifest(&manifest).unwrap();
    session::record_boot(&f.ws, id, booted_at).unwrap();
}

/// Saves a plan whose steps are all queued.
fn seed_plan(f: &Fleet, plan_id: &str, steps: &[(&str, &str)]) {
    let mut plan = Plan::new(
        plan_id,
        Checkpoint::new("work reviewed by the manager", "codex-m"),
    );
    for (id, title) in steps {
        plan = plan.with_step(Step::new(*id, *title));
    }
    f.store.save_plan(&plan).unwrap();
}

/// Writes the backlog document into the workspace root.
fn write_backlog(f: &Fleet, items: &[BacklogItem]) -> PathBuf {
    let path = f.ws.root().join("backlog.json");
    write_json_document(&path, &items.to_vec()).unwrap();
    path
}

/// Sorted entry names under `dir`.
fn entry_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Evaluator pinned to one verdict.
struct SteadyEvaluator(ReadinessVerdict);

impl ReadinessEvaluator for SteadyEvaluator {
    fn assess(&self, _brief: &TaskBrief) -> Result<SystemicReadiness, CoordinatorError> {
        Ok(SystemicReadiness::new(self.0, 88.0))
    }
}

/// Scanner that never finds anything wrong.
struct CleanScans;

impl ScanTrigger for CleanScans {
    fn check(&self, _phase: ScanPhase) -> ScanOutcome {
        ScanOutcome::clear()
    }
}

/// Worker that walks its step through `in_progress` to `done`, the way
/// the manifest instructs real workers to.
struct StepWorker {
    store: RecordStore,
    calls: Cell<u32>,
}

impl WorkerHarness for StepWorker {
    fn execute(&self, manifest: &StepManifest) -> Result<WorkerOutcome, CoordinatorError> {
        self.calls.set(self.calls.get() + 1);
        set_step_status(
            &self.store,
            &manifest.plan_id,
            &manifest.step_id,
            PlanState::InProgress,
            None,
        )?;
        set_step_status(
            &self.store,
            &manifest.plan_id,
            &manifest.step_id,
            PlanState::Done,
            Some("finished by worker"),
        )?;
        Ok(WorkerOutcome { exit_code: 0 })
    }
}

/// Worker that only counts invocations.
struct IdleWorker {
    calls: Cell<u32>,
}

impl WorkerHarness for IdleWorker {
    fn execute(&self, _manifest: &StepManifest) -> Result<WorkerOutcome, CoordinatorError> {
        self.calls.set(self.calls.get() + 1);
        Ok(WorkerOutcome { exit_code: 0 })
    }
}

/// Bundles borrowed collaborators into cycle dependencies.
fn cycle_deps<'a>(
    f: &'a Fleet,
    evaluator: &'a dyn ReadinessEvaluator,
    scanner: &'a dyn ScanTrigger,
    worker: &'a dyn WorkerHarness,
    overrides: &'a Override,
) -> CycleDeps<'a> {
    CycleDeps {
        workspace: &f.ws,
        store: &f.store,
        journal: &f.journal,
        evaluator,
        scanner,
        worker,
        overrides,
        manager: None,
    }
}

// ============================================================================
// Claim Lifecycle
// ============================================================================

/// A live claim refuses rivals outright: overrides do not help, the
/// record on disk keeps its owner, and the attempted guarded write
/// lands in the rival's audit log instead of the shared event log.
#[test]
fn live_claim_shields_the_owner_from_rivals() {
    let f = fleet();
    let t0 = noon();
    f.store
        .save_assignment(&Assignment::new("QUEUE-1", "codex-3"))
        .unwrap();
    claim_task(
        &f.store,
        &f.journal,
        &ClaimRequest::new("QUEUE-1", "codex-3").with_branch("feat/queue-1"),
        &Override::none(),
        t0,
    )
    .unwrap();

    let err = claim_task(
        &f.store,
        &f.journal,
        &ClaimRequest::new("QUEUE-1", "codex-9"),
        &Override::none().allow_unassigned(),
        t0 + Duration::minutes(5),
    )
    .unwrap_err();
    match err {
        ClaimError::Conflict { owner, status, .. } => {
            assert_eq!(owner, "codex-3");
            assert_eq!(status, ClaimStatus::Active);
        },
        other => panic!("unexpected error: {other}"),
    }

    let claim = f.store.load_claim("QUEUE-1").unwrap().unwrap();
    assert_eq!(claim.agent_id, "codex-3");
    assert_eq!(claim.version, 1);
    assert_eq!(claim.branch.as_deref(), Some("feat/queue-1"));

    let hijack = EventRecord::new(
        t0 + Duration::minutes(10),
        "codex-9",
        EventKind::Status,
        "taking over",
    )
    .with_task("QUEUE-1");
    let err = guard::log_event(&f.store, &f.journal, &hijack).unwrap_err();
    assert!(matches!(err, ClaimError::ForeignClaim { .. }));
    assert!(f.journal.read_events(None).unwrap().is_empty());

    let audit = f.journal.read_audit("codex-9").unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].kind, AuditKind::Refusal);
    assert_eq!(audit[0].guard, GuardKind::Ownership);
    assert_eq!(audit[0].observed_owner.as_deref(), Some("codex-3"));
}

/// Once the owner releases terminally, any agent may speak about the
/// task or claim it fresh, and the version trail records every rewrite
/// for independent readers.
#[test]
fn terminal_release_reopens_the_task_for_the_fleet() {
    let f = fleet();
    let t0 = noon();
    f.store
        .save_assignment(&Assignment::new("QUEUE-1", "codex-3"))
        .unwrap();
    claim_task(
        &f.store,
        &f.journal,
        &ClaimRequest::new("QUEUE-1", "codex-3"),
        &Override::none(),
        t0,
    )
    .unwrap();
    let progress = EventRecord::new(
        t0 + Duration::minutes(30),
        "codex-3",
        EventKind::Progress,
        "parser landed",
    )
    .with_task("QUEUE-1");
    guard::log_event(&f.store, &f.journal, &progress).unwrap();

    let released = release_task(
        &f.store,
        "QUEUE-1",
        "codex-3",
        ClaimStatus::Done,
        Some("shipped in r2146"),
        t0 + Duration::hours(1),
    )
    .unwrap();
    assert_eq!(released.version, 2);
    assert!(released.released_at.is_some());

    // Terminal claims admit any agent's guarded writes.
    let followup = EventRecord::new(
        t0 + Duration::hours(2),
        "codex-9",
        EventKind::Status,
        "archiving QUEUE-1",
    )
    .with_task("QUEUE-1");
    guard::log_event(&f.store, &f.journal, &followup).unwrap();
    assert_eq!(f.journal.read_events(None).unwrap().len(), 2);

    // A fresh claim over a terminal record needs no assignment and
    // keeps the original claim instant.
    let reclaimed = claim_task(
        &f.store,
        &f.journal,
        &ClaimRequest::new("QUEUE-1", "codex-9"),
        &Override::none(),
        t0 + Duration::hours(3),
    )
    .unwrap();
    assert_eq!(reclaimed.agent_id, "codex-9");
    assert_eq!(reclaimed.version, 3);
    assert_eq!(reclaimed.claimed_at, t0);

    // Another process reading the same directory sees the full trail.
    let reader = RecordStore::new(&f.ws);
    let observed = reader.load_claim("QUEUE-1").unwrap().unwrap();
    assert_eq!(observed.version, 3);
    assert_eq!(observed.agent_id, "codex-9");
}

// ============================================================================
// Supervised Service
// ============================================================================

/// Seeds two plans and a four-item backlog, then lets an unbounded
/// service drain it:
///
/// 1. Rounds 1 and 2 walk PLAN-A through both steps via item T-ALPHA.
/// 2. Round 3 finishes PLAN-B via T-BETA.
/// 3. Round 4 finds no work and stops the service.
#[test]
fn service_drains_a_seeded_backlog_end_to_end() {
    let f = fleet();
    register_manager(&f, "codex-m", Utc::now());
    seed_plan(
        &f,
        "PLAN-A",
        &[("S1", "write the parser"), ("S2", "wire up retries")],
    );
    seed_plan(&f, "PLAN-B", &[("S1", "draft the rollout note")]);
    f.store
        .save_assignment(&Assignment::new("T-ALPHA", "codex-w1"))
        .unwrap();
    f.store
        .save_assignment(&Assignment::new("T-BETA", "codex-w1"))
        .unwrap();
    let backlog = write_backlog(
        &f,
        &[
            BacklogItem::new("T-DONE", BacklogStatus::Done).with_plan("PLAN-A"),
            BacklogItem::new("T-STRAY", BacklogStatus::Pending),
            BacklogItem::new("T-ALPHA", BacklogStatus::Pending).with_plan("PLAN-A"),
            BacklogItem::new("T-BETA", BacklogStatus::Queued).with_plan("PLAN-B"),
        ],
    );

    let evaluator = SteadyEvaluator(ReadinessVerdict::Ready);
    let worker = StepWorker {
        store: f.store.clone(),
        calls: Cell::new(0),
    };
    let overrides = Override::none();
    let deps = cycle_deps(&f, &evaluator, &CleanScans, &worker, &overrides);
    let config = ServiceConfig::new(&backlog)
        .with_worker("codex-w1")
        .with_round_receipts(true);

    let summary = supervise(&deps, &config).unwrap();

    assert_eq!(summary.stop, ServiceStop::BacklogDrained);
    assert_eq!(summary.rounds_run, 4);
    assert_eq!(summary.exit_code(), exit_codes::SUCCESS);
    assert_eq!(worker.calls.get(), 3);

    // Both plans are exhausted on disk.
    for plan_id in ["PLAN-A", "PLAN-B"] {
        let plan = f.store.load_plan(plan_id).unwrap().unwrap();
        assert!(
            plan.next_open_step().is_none(),
            "{plan_id} should have no open steps left"
        );
    }

    // The worker holds both items; T-ALPHA was re-claimed once per step.
    let alpha = f.store.load_claim("T-ALPHA").unwrap().unwrap();
    assert_eq!(alpha.agent_id, "codex-w1");
    assert_eq!(alpha.version, 2);
    assert_eq!(alpha.plan_id.as_deref(), Some("PLAN-A"));
    let beta = f.store.load_claim("T-BETA").unwrap().unwrap();
    assert_eq!(beta.version, 1);
    assert_eq!(beta.plan_id.as_deref(), Some("PLAN-B"));

    // Every cycle left a step manifest and a state receipt.
    let receipts = entry_names(&f.ws.coordinator_receipts_dir());
    assert_eq!(
        receipts
            .iter()
            .filter(|name| name.ends_with(".manifest.json"))
            .count(),
        3
    );
    assert_eq!(
        receipts
            .iter()
            .filter(|name| name.starts_with("cycle-"))
            .count(),
        3
    );

    // The PLAN-B receipt records a clean, executed cycle.
    let name = receipts
        .iter()
        .find(|name| name.starts_with("cycle-PLAN-B-S1-"))
        .unwrap();
    let state: CoordinatorState =
        read_json_document(&f.ws.coordinator_receipts_dir().join(name))
            .unwrap()
            .unwrap();
    assert_eq!(state.manager_agent, "codex-m");
    assert!(state.worker.executed);
    assert_eq!(state.worker.exit_code, Some(0));
    assert!(!state.circuit_breaker.active);
    assert_eq!(state.systemic.unwrap().verdict, ReadinessVerdict::Ready);

    // Four rounds, four receipts; the final round found no work.
    let rounds_dir = f.ws.coordinator_receipts_dir().join("rounds");
    let round_names = entry_names(&rounds_dir);
    assert_eq!(round_names.len(), 4);
    let last: RoundReceipt = read_json_document(&rounds_dir.join(&round_names[3]))
        .unwrap()
        .unwrap();
    assert_eq!(last.round, 4);
    assert_eq!(last.workers.len(), 1);
    assert_eq!(last.workers[0].iterations_run, 0);
    assert!(!last.workers[0].aborted);

    // The manager announced every cycle on the shared log.
    let events = f.journal.read_events(None).unwrap();
    assert_eq!(events.len(), 3);
    for event in &events {
        assert_eq!(event.agent_id, "codex-m");
        assert_eq!(event.kind, EventKind::Status);
        assert_eq!(event.severity, Some(Severity::Info));
    }
}

/// A `hold` verdict trips the breaker before the worker is invoked.
/// The claim is already taken by then, the step never moves, and the
/// state receipt names the verdict as the first cause.
#[test]
fn systemic_hold_stops_the_round_before_the_worker_runs() {
    let f = fleet();
    register_manager(&f, "codex-m", Utc::now());
    seed_plan(&f, "PLAN-A", &[("S1", "migrate the index")]);
    f.store
        .save_assignment(&Assignment::new("T-ALPHA", "codex-w1"))
        .unwrap();
    let backlog = write_backlog(
        &f,
        &[BacklogItem::new("T-ALPHA", BacklogStatus::Pending).with_plan("PLAN-A")],
    );

    let evaluator = SteadyEvaluator(ReadinessVerdict::Hold);
    let worker = IdleWorker {
        calls: Cell::new(0),
    };
    let overrides = Override::none();
    let deps = cycle_deps(&f, &evaluator, &CleanScans, &worker, &overrides);
    let config = ServiceConfig::new(&backlog).with_worker("codex-w1");

    let summary = supervise(&deps, &config).unwrap();

    assert_eq!(summary.rounds_run, 1);
    assert_eq!(
        summary.stop,
        ServiceStop::WorkerFailed {
            worker: "codex-w1".to_string(),
            exit_code: exit_codes::BREAKER_TRIPPED,
        }
    );
    assert_eq!(summary.exit_code(), exit_codes::BREAKER_TRIPPED);
    assert_eq!(worker.calls.get(), 0);

    // The claim was taken before the verdict came back.
    let claim = f.store.load_claim("T-ALPHA").unwrap().unwrap();
    assert_eq!(claim.agent_id, "codex-w1");
    assert_eq!(claim.version, 1);

    // The receipt names the first cause; the step never moved.
    let receipts = entry_names(&f.ws.coordinator_receipts_dir());
    let name = receipts
        .iter()
        .find(|name| name.starts_with("cycle-PLAN-A-S1-"))
        .unwrap();
    let state: CoordinatorState =
        read_json_document(&f.ws.coordinator_receipts_dir().join(name))
            .unwrap()
            .unwrap();
    assert!(state.circuit_breaker.active);
    assert_eq!(
        state.circuit_breaker.reason.as_deref(),
        Some("systemic_verdict=hold")
    );
    assert!(!state.worker.executed);
    assert!(state.post_scan.is_none());
    let plan = f.store.load_plan("PLAN-A").unwrap().unwrap();
    assert_eq!(plan.step("S1").unwrap().status, PlanState::Queued);

    // And the announcement is high severity.
    let events = f.journal.read_events(None).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Some(Severity::High));
    assert!(events[0].summary.contains("tripped"));
}

// ============================================================================
// Monitors
// ============================================================================

/// The conflict detector and the heartbeat monitor read the same
/// records the working agents wrote; there is no separate reporting
/// step to forget.
#[test]
fn monitors_read_the_work_the_claims_left_behind() {
    let f = fleet();
    let now = noon();
    let manifest = AgentManifest::new("codex-m").with_role(AgentRole::Manager);
    f.store.save_manifest(&manifest).unwrap();

    // The manager was last heard from three hours ago.
    let sync = EventRecord::new(
        now - Duration::hours(3),
        "codex-m",
        EventKind::Status,
        "fleet sync",
    );
    guard::log_event(&f.store, &f.journal, &sync).unwrap();

    // codex-1 claimed QUEUE-7 and reported progress 45 minutes ago.
    f.store
        .save_assignment(&Assignment::new("QUEUE-7", "codex-1"))
        .unwrap();
    claim_task(
        &f.store,
        &f.journal,
        &ClaimRequest::new("QUEUE-7", "codex-1").with_plan("PLAN-Q"),
        &Override::none(),
        now - Duration::minutes(50),
    )
    .unwrap();
    let progress = EventRecord::new(
        now - Duration::minutes(45),
        "codex-1",
        EventKind::Progress,
        "parser half done",
    )
    .with_task("QUEUE-7");
    guard::log_event(&f.store, &f.journal, &progress).unwrap();

    // A rival sizing up the workspace sees hard parallel work.
    let policy = ConflictPolicy {
        hard_window_secs: 3600,
        soft_window_secs: 14_400,
        stale_window_secs: 21_600,
        require_plan_claim: true,
        require_scan_receipt: true,
    };
    let report = conflict::detect(&f.store, &f.journal, &policy, "codex-2", now).unwrap();
    assert_eq!(report.severity, ConflictSeverity::Hard);
    assert_eq!(report.hard_agents, vec!["codex-1".to_string()]);
    assert_eq!(report.soft_agents, vec!["codex-m".to_string()]);
    assert_eq!(report.active_claims.len(), 1);
    assert_eq!(report.active_claims[0].task_id, "QUEUE-7");
    assert!(report.requirements.session_boot);
    assert!(report.requirements.plan_claim);

    // The watchdog sees the same silence and alerts on it.
    let windows = HeartbeatWindows {
        manager_secs: 1800,
        agent_secs: 1800,
    };
    let outcome =
        heartbeat::check(&f.store, &f.journal, &f.ws, "watchdog", windows, true, now).unwrap();
    assert_eq!(outcome.report.severity, Severity::High);
    let kinds: Vec<AlertKind> = outcome.report.alerts.iter().map(|alert| alert.kind).collect();
    assert!(kinds.contains(&AlertKind::ManagerHeartbeatStale));
    assert!(kinds.contains(&AlertKind::AgentIdle));

    // The receipt round-trips, and the alert is mirrored to the logs.
    let stored: HeartbeatReport = read_json_document(&outcome.receipt_path).unwrap().unwrap();
    assert_eq!(stored, outcome.report);
    let events = f.journal.read_events(None).unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Alert);
    assert_eq!(last.agent_id, "watchdog");
    assert_eq!(last.severity, Some(Severity::High));
    let pointers = f.journal.read_messages(OPS_CHANNEL, None).unwrap();
    assert_eq!(pointers.len(), 1);
    assert_eq!(pointers[0].kind, MessageKind::Pointer);
}
