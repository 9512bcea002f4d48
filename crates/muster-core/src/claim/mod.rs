//! Task claims: exclusive-ownership records over backlog tasks.
//!
//! A claim marks one agent as the owner of one task. Claims are single
//! JSON documents mutated in place; no history is kept, and a terminal
//! claim persists as an audit record rather than being deleted.
//!
//! Acquisition is read-then-write with no locking. Two processes racing
//! for the same task can both observe it unclaimed and both succeed; the
//! last writer wins. The `version` counter makes that overwrite
//! observable: every successful write bumps it, so a claim whose version
//! jumped by more than one since an agent last read it was rewritten by
//! someone else.
//!
//! Claiming a task for the first time requires an assignment document
//! naming the agent. Re-claiming over an existing record does not; the
//! conflict check on live foreign claims applies instead and cannot be
//! overridden.

mod error;
pub mod guard;

pub use error::ClaimError;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::journal::{AuditRecord, GuardKind, Journal};
use crate::policy::Override;
use crate::store::RecordStore;

/// Lifecycle status of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// The owner is working the task.
    Active,
    /// The owner has set the task aside but still holds it.
    Paused,
    /// The owner gave the task up without finishing it.
    Released,
    /// The task is finished.
    Done,
}

impl ClaimStatus {
    /// Returns the wire representation of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Released => "released",
            Self::Done => "done",
        }
    }

    /// Whether this status ends the claim's exclusivity.
    ///
    /// Terminal claims persist on disk but no longer gate anything: the
    /// ownership guard waves every agent through them.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Done)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ownership record for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Claim {
    pub task_id: String,
    pub agent_id: String,
    pub status: ClaimStatus,
    /// Set on first claim and preserved across rewrites of the record.
    pub claimed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Bumped on every successful write of this record.
    #[serde(default)]
    pub version: u64,
}

impl Claim {
    /// Whether the claim no longer gates anything.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the claim still excludes other agents.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.is_terminal()
    }
}

/// External record assigning a task to an agent before any claim exists.
///
/// Assignments are written by whoever dispatches work; the claim gate
/// reads them but never writes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Assignment {
    pub task_id: String,
    pub agent_id: String,
    /// Manager responsible for the assignment, if any. Feeds manager
    /// discovery for the heartbeat monitor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Assignment {
    /// Creates an assignment of `task_id` to `agent_id`.
    #[must_use]
    pub fn new(task_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            manager: None,
            notes: None,
        }
    }

    /// Names the responsible manager.
    #[must_use]
    pub fn with_manager(mut self, manager: impl Into<String>) -> Self {
        self.manager = Some(manager.into());
        self
    }

    /// Attaches free-form notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Parameters for claiming a task.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRequest {
    pub task_id: String,
    pub agent_id: String,
    pub status: ClaimStatus,
    pub branch: Option<String>,
    pub plan_id: Option<String>,
    pub notes: Option<String>,
}

impl ClaimRequest {
    /// Creates a request to claim `task_id` as `agent_id` with status
    /// `active`.
    #[must_use]
    pub fn new(task_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            status: ClaimStatus::Active,
            branch: None,
            plan_id: None,
            notes: None,
        }
    }

    /// Sets the initial status, for claims taken in a paused state.
    #[must_use]
    pub const fn with_status(mut self, status: ClaimStatus) -> Self {
        self.status = status;
        self
    }

    /// Attaches a working branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Attaches a plan reference.
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

/// Claims a task, creating or overwriting its claim record.
///
/// A live claim held by another agent fails with [`ClaimError::Conflict`];
/// there is no override for that. A fresh claim (no prior record) requires
/// an assignment naming the agent unless `overrides.allow_unassigned` is
/// set, in which case the bypass is written to the agent's audit log
/// before the claim proceeds.
pub fn claim_task(
    store: &RecordStore,
    journal: &Journal,
    request: &ClaimRequest,
    overrides: &Override,
    now: DateTime<Utc>,
) -> Result<Claim, ClaimError> {
    let prior = store.load_claim(&request.task_id)?;

    if let Some(existing) = &prior {
        if existing.is_live() && existing.agent_id != request.agent_id {
            return Err(ClaimError::Conflict {
                task_id: request.task_id.clone(),
                owner: existing.agent_id.clone(),
                status: existing.status,
            });
        }
    } else {
        check_assignment(store, journal, request, overrides, now)?;
    }

    let claim = Claim {
        task_id: request.task_id.clone(),
        agent_id: request.agent_id.clone(),
        status: request.status,
        claimed_at: prior.as_ref().map_or(now, |c| c.claimed_at),
        released_at: None,
        branch: request.branch.clone(),
        plan_id: request.plan_id.clone(),
        notes: request.notes.clone(),
        version: prior.as_ref().map_or(0, |c| c.version) + 1,
    };
    store.save_claim(&claim)?;
    tracing::debug!(
        task_id = %claim.task_id,
        agent_id = %claim.agent_id,
        version = claim.version,
        "claim recorded"
    );
    Ok(claim)
}

fn check_assignment(
    store: &RecordStore,
    journal: &Journal,
    request: &ClaimRequest,
    overrides: &Override,
    now: DateTime<Utc>,
) -> Result<(), ClaimError> {
    let assignment = store.load_assignment(&request.task_id)?;
    let named_agent = assignment.as_ref().map(|a| a.agent_id.clone());
    if named_agent.as_deref() == Some(request.agent_id.as_str()) {
        return Ok(());
    }
    if overrides.allow_unassigned {
        let record = AuditRecord::bypass(now, &request.agent_id, GuardKind::Assignment, "claim_task")
            .with_task(&request.task_id)
            .with_detail(overrides.note_or_default());
        journal.append_audit(&record)?;
        tracing::warn!(
            task_id = %request.task_id,
            agent_id = %request.agent_id,
            "claiming without a matching assignment (override)"
        );
        return Ok(());
    }
    Err(ClaimError::AssignmentRequired {
        task_id: request.task_id.clone(),
        agent_id: request.agent_id.clone(),
        assigned_to: named_agent,
    })
}

/// Releases a claim, setting a new status and stamping `released_at`.
///
/// Only the recorded owner may release, even when the claim is already
/// terminal. `notes`, when given, replaces the stored notes.
pub fn release_task(
    store: &RecordStore,
    task_id: &str,
    agent_id: &str,
    new_status: ClaimStatus,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Claim, ClaimError> {
    let mut claim = store.load_claim(task_id)?.ok_or_else(|| ClaimError::NoClaim {
        task_id: task_id.to_string(),
    })?;
    if claim.agent_id != agent_id {
        return Err(ClaimError::ForeignOwner {
            task_id: task_id.to_string(),
            owner: claim.agent_id,
            agent_id: agent_id.to_string(),
        });
    }
    claim.status = new_status;
    claim.released_at = Some(now);
    if let Some(notes) = notes {
        claim.notes = Some(notes.to_string());
    }
    claim.version += 1;
    store.save_claim(&claim)?;
    tracing::debug!(
        task_id = %claim.task_id,
        agent_id = %claim.agent_id,
        status = claim.status.as_str(),
        "claim released"
    );
    Ok(claim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Workspace, WorkspaceConfig};
    use chrono::TimeZone;

    fn fixture(dir: &std::path::Path) -> (RecordStore, Journal) {
        let ws = Workspace::resolve(dir, &WorkspaceConfig::default());
        (RecordStore::new(&ws), Journal::new(&ws))
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    fn assign(store: &RecordStore, task: &str, agent: &str) {
        store.save_assignment(&Assignment::new(task, agent)).unwrap();
    }

    #[test]
    fn fresh_claim_with_assignment_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (store, journal) = fixture(dir.path());
        assign(&store, "QUEUE-1", "codex-1");
        let request = ClaimRequest::new("QUEUE-1", "codex-1").with_branch("feat/queue");
        let claim = claim_task(&store, &journal, &request, &Override::none(), at(9)).unwrap();
        assert_eq!(claim.status, ClaimStatus::Active);
        assert_eq!(claim.claimed_at, at(9));
        assert_eq!(claim.version, 1);
        assert!(journal.read_audit("codex-1").unwrap().is_empty());
    }

    #[test]
    fn fresh_claim_without_assignment_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (store, journal) = fixture(dir.path());
        let request = ClaimRequest::new("QUEUE-1", "codex-1");
        let err = claim_task(&store, &journal, &request, &Override::none(), at(9)).unwrap_err();
        match err {
            ClaimError::AssignmentRequired { assigned_to, .. } => assert_eq!(assigned_to, None),
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.load_claim("QUEUE-1").unwrap().is_none());
    }

    #[test]
    fn fresh_claim_against_foreign_assignment_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (store, journal) = fixture(dir.path());
        assign(&store, "QUEUE-1", "codex-2");
        let request = ClaimRequest::new("QUEUE-1", "codex-1");
        let err = claim_task(&store, &journal, &request, &Override::none(), at(9)).unwrap_err();
        match err {
            ClaimError::AssignmentRequired { assigned_to, .. } => {
                assert_eq!(assigned_to.as_deref(), Some("codex-2"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn override_bypasses_assignment_and_is_audited() {
        let dir = tempfile::tempdir().unwrap();
        let (store, journal) = fixture(dir.path());
        let request = ClaimRequest::new("QUEUE-1", "codex-1");
        let overrides = Override::none()
            .allow_unassigned()
            .with_note("bootstrap before dispatch");
        let claim = claim_task(&store, &journal, &request, &overrides, at(9)).unwrap();
        assert_eq!(claim.version, 1);
        let audit = journal.read_audit("codex-1").unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].guard, GuardKind::Assignment);
        assert_eq!(audit[0].detail.as_deref(), Some("bootstrap before dispatch"));
    }

    #[test]
    fn live_foreign_claim_conflicts_even_with_override() {
        let dir = tempfile::tempdir().unwrap();
        let (store, journal) = fixture(dir.path());
        assign(&store, "QUEUE-1", "codex-1");
        let first = ClaimRequest::new("QUEUE-1", "codex-1");
        claim_task(&store, &journal, &first, &Override::none(), at(9)).unwrap();

        let second = ClaimRequest::new("QUEUE-1", "codex-2");
        let overrides = Override::none().allow_unassigned();
        let err = claim_task(&store, &journal, &second, &overrides, at(10)).unwrap_err();
        match err {
            ClaimError::Conflict { owner, status, .. } => {
                assert_eq!(owner, "codex-1");
                assert_eq!(status, ClaimStatus::Active);
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn paused_claim_still_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let (store, journal) = fixture(dir.path());
        assign(&store, "QUEUE-1", "codex-1");
        let request = ClaimRequest::new("QUEUE-1", "codex-1").with_status(ClaimStatus::Paused);
        claim_task(&store, &journal, &request, &Override::none(), at(9)).unwrap();
        let second = ClaimRequest::new("QUEUE-1", "codex-2");
        let err = claim_task(&store, &journal, &second, &Override::none(), at(10)).unwrap_err();
        assert!(matches!(err, ClaimError::Conflict { .. }));
    }

    #[test]
    fn reclaim_after_terminal_keeps_claimed_at_and_bumps_version() {
        let dir = tempfile::tempdir().unwrap();
        let (store, journal) = fixture(dir.path());
        assign(&store, "QUEUE-1", "codex-1");
        let request = ClaimRequest::new("QUEUE-1", "codex-1");
        claim_task(&store, &journal, &request, &Override::none(), at(9)).unwrap();
        release_task(&store, "QUEUE-1", "codex-1", ClaimStatus::Done, None, at(10)).unwrap();

        // no assignment needed once a record exists, and the original
        // claim timestamp survives the rewrite
        let takeover = ClaimRequest::new("QUEUE-1", "codex-2");
        let claim = claim_task(&store, &journal, &takeover, &Override::none(), at(11)).unwrap();
        assert_eq!(claim.agent_id, "codex-2");
        assert_eq!(claim.claimed_at, at(9));
        assert_eq!(claim.released_at, None);
        assert_eq!(claim.version, 3);
    }

    #[test]
    fn same_agent_reclaim_updates_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (store, journal) = fixture(dir.path());
        assign(&store, "QUEUE-1", "codex-1");
        claim_task(
            &store,
            &journal,
            &ClaimRequest::new("QUEUE-1", "codex-1"),
            &Override::none(),
            at(9),
        )
        .unwrap();
        let updated = claim_task(
            &store,
            &journal,
            &ClaimRequest::new("QUEUE-1", "codex-1")
                .with_branch("feat/queue-2")
                .with_status(ClaimStatus::Paused),
            &Override::none(),
            at(10),
        )
        .unwrap();
        assert_eq!(updated.branch.as_deref(), Some("feat/queue-2"));
        assert_eq!(updated.status, ClaimStatus::Paused);
        assert_eq!(updated.claimed_at, at(9));
        assert_eq!(updated.version, 2);
    }

    #[test]
    fn release_stamps_status_and_time() {
        let dir = tempfile::tempdir().unwrap();
        let (store, journal) = fixture(dir.path());
        assign(&store, "QUEUE-1", "codex-1");
        claim_task(
            &store,
            &journal,
            &ClaimRequest::new("QUEUE-1", "codex-1"),
            &Override::none(),
            at(9),
        )
        .unwrap();
        let released = release_task(
            &store,
            "QUEUE-1",
            "codex-1",
            ClaimStatus::Done,
            Some("merged in abc123"),
            at(12),
        )
        .unwrap();
        assert_eq!(released.status, ClaimStatus::Done);
        assert_eq!(released.released_at, Some(at(12)));
        assert_eq!(released.notes.as_deref(), Some("merged in abc123"));
        assert!(released.is_terminal());
    }

    #[test]
    fn release_without_claim_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _journal) = fixture(dir.path());
        let err =
            release_task(&store, "QUEUE-1", "codex-1", ClaimStatus::Done, None, at(9)).unwrap_err();
        assert!(matches!(err, ClaimError::NoClaim { .. }));
    }

    #[test]
    fn release_by_non_owner_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (store, journal) = fixture(dir.path());
        assign(&store, "QUEUE-1", "codex-1");
        claim_task(
            &store,
            &journal,
            &ClaimRequest::new("QUEUE-1", "codex-1"),
            &Override::none(),
            at(9),
        )
        .unwrap();
        let err =
            release_task(&store, "QUEUE-1", "codex-2", ClaimStatus::Done, None, at(10)).unwrap_err();
        match err {
            ClaimError::ForeignOwner { owner, agent_id, .. } => {
                assert_eq!(owner, "codex-1");
                assert_eq!(agent_id, "codex-2");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn racing_writers_leave_observable_version_trail() {
        let dir = tempfile::tempdir().unwrap();
        let (store, journal) = fixture(dir.path());
        assign(&store, "QUEUE-1", "codex-1");
        assign(&store, "QUEUE-2", "codex-2");

        // both writers observe no claim, then write in turn; the second
        // write wins and its version shows a rewrite happened
        let a = ClaimRequest::new("QUEUE-1", "codex-1");
        let first = claim_task(&store, &journal, &a, &Override::none(), at(9)).unwrap();
        assert_eq!(first.version, 1);

        // simulate the loser's overwrite arriving late: same-agent rewrite
        let again = claim_task(&store, &journal, &a, &Override::none(), at(9)).unwrap();
        assert_eq!(again.version, 2);
        let stored = store.load_claim("QUEUE-1").unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }
}
