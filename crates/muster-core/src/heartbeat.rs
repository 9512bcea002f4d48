//! Heartbeat monitor: liveness from journal activity and claims.
//!
//! Nothing in a workspace pings anything. Liveness is inferred at check
//! time from what agents have already written:
//!
//! - **Managers** are expected to emit a `status` or `handshake` event
//!   within the manager window. A manager with none at all is `missing`;
//!   one whose latest is too old is `stale`; otherwise `active`.
//! - **Agents holding live claims** are expected to show some activity,
//!   event or message, within the agent window. Silence flags them idle
//!   along with the tasks they are sitting on.
//!
//! Every check writes a timestamped report receipt and always counts as a
//! success; alerts are data, not errors. When alerts exist the check can
//! mirror a summary event into the shared log and drop a pointer message
//! on the ops channel so readers who never look at receipts still see it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent;
use crate::claim::Claim;
use crate::config::Workspace;
use crate::journal::{
    EventKind, EventRecord, Journal, JournalError, MessageKind, MessageRecord, Severity,
    OPS_CHANNEL,
};
use crate::store::{self, RecordStore, StoreError};

/// Schema tag carried by heartbeat report receipts.
pub const HEARTBEAT_REPORT_SCHEMA: &str = "muster.heartbeat_report.v1";

/// Errors surfaced while computing or persisting a heartbeat report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HeartbeatError {
    /// Reading records or writing the receipt failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reading or appending journal logs failed.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Freshness windows for one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatWindows {
    /// Managers must have heartbeated within this many seconds.
    pub manager_secs: u64,
    /// Claim holders must have shown activity within this many seconds.
    pub agent_secs: u64,
}

impl HeartbeatWindows {
    /// Windows from the workspace settings.
    #[must_use]
    pub fn from_workspace(workspace: &Workspace) -> Self {
        Self {
            manager_secs: workspace.manager_window_secs(),
            agent_secs: workspace.agent_window_secs(),
        }
    }
}

/// Classification of one manager's heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    /// No status or handshake event found at all.
    Missing,
    /// The latest heartbeat is older than the manager window.
    Stale,
    /// Heartbeated within the window.
    Active,
}

impl ManagerState {
    /// Returns the wire representation of this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Stale => "stale",
            Self::Active => "active",
        }
    }
}

/// Heartbeat view of one manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerStatus {
    pub agent_id: String,
    pub state: ManagerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<u64>,
}

/// A claim holder that has gone quiet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdleAgent {
    pub agent_id: String,
    /// Seconds since the agent's last event or message.
    pub idle_secs: u64,
    /// Tasks the agent holds live claims on.
    pub tasks: Vec<String>,
}

/// Alert classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ManagerHeartbeatMissing,
    ManagerHeartbeatStale,
    AgentIdle,
}

impl AlertKind {
    /// Returns the wire representation of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ManagerHeartbeatMissing => "manager_heartbeat_missing",
            Self::ManagerHeartbeatStale => "manager_heartbeat_stale",
            Self::AgentIdle => "agent_idle",
        }
    }
}

/// One alert raised by a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatAlert {
    pub kind: AlertKind,
    pub severity: Severity,
    /// Agent the alert is about.
    pub agent_id: String,
    pub detail: String,
}

/// Persisted result of one heartbeat check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatReport {
    /// Always [`HEARTBEAT_REPORT_SCHEMA`].
    pub schema: String,
    pub ts: DateTime<Utc>,
    /// `high` when any manager alert fired, `medium` when only idle
    /// agents fired, `low` otherwise.
    pub severity: Severity,
    pub managers: Vec<ManagerStatus>,
    pub idle_agents: Vec<IdleAgent>,
    pub alerts: Vec<HeartbeatAlert>,
}

/// A computed report together with where its receipt landed.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatOutcome {
    pub report: HeartbeatReport,
    pub receipt_path: PathBuf,
}

/// Runs one heartbeat check at `now`.
///
/// Always writes a report receipt. With `mirror` set and at least one
/// alert raised, also appends an alert event to the shared log (as
/// `observer`) and a pointer message on the ops channel.
pub fn check(
    store: &RecordStore,
    journal: &Journal,
    workspace: &Workspace,
    observer: &str,
    windows: HeartbeatWindows,
    mirror: bool,
    now: DateTime<Utc>,
) -> Result<HeartbeatOutcome, HeartbeatError> {
    let events = journal.read_events(None)?;
    let managers = classify_managers(store, &events, windows.manager_secs, now)?;
    let idle_agents = find_idle_agents(store, journal, &events, windows.agent_secs, now)?;

    let mut alerts = Vec::new();
    for manager in &managers {
        match manager.state {
            ManagerState::Missing => alerts.push(HeartbeatAlert {
                kind: AlertKind::ManagerHeartbeatMissing,
                severity: Severity::High,
                agent_id: manager.agent_id.clone(),
                detail: format!("manager {} has no status or handshake event", manager.agent_id),
            }),
            ManagerState::Stale => {
                let age = manager.age_secs.unwrap_or(0);
                alerts.push(HeartbeatAlert {
                    kind: AlertKind::ManagerHeartbeatStale,
                    severity: Severity::High,
                    agent_id: manager.agent_id.clone(),
                    detail: format!(
                        "manager {} last heartbeated {age}s ago, window is {}s",
                        manager.agent_id, windows.manager_secs
                    ),
                });
            },
            ManagerState::Active => {},
        }
    }
    for idle in &idle_agents {
        alerts.push(HeartbeatAlert {
            kind: AlertKind::AgentIdle,
            severity: Severity::Medium,
            agent_id: idle.agent_id.clone(),
            detail: format!(
                "{} silent for {}s while holding {}",
                idle.agent_id,
                idle.idle_secs,
                idle.tasks.join(", ")
            ),
        });
    }

    let severity = alerts
        .iter()
        .map(|alert| alert.severity)
        .max()
        .unwrap_or(Severity::Low);

    let report = HeartbeatReport {
        schema: HEARTBEAT_REPORT_SCHEMA.to_string(),
        ts: now,
        severity,
        managers,
        idle_agents,
        alerts,
    };

    let receipt_path = workspace
        .heartbeat_receipts_dir()
        .join(format!("heartbeat-{}.json", now.format("%Y%m%dT%H%M%SZ")));
    store::write_json_document(&receipt_path, &report)?;
    tracing::debug!(
        severity = report.severity.as_str(),
        alerts = report.alerts.len(),
        "heartbeat report persisted"
    );

    if mirror && !report.alerts.is_empty() {
        let receipt = receipt_path.to_string_lossy().into_owned();
        let summary = format!(
            "heartbeat: {} alert(s), severity {}",
            report.alerts.len(),
            report.severity.as_str()
        );
        let event = EventRecord::new(now, observer, EventKind::Alert, summary.clone())
            .with_receipt(receipt.clone())
            .with_severity(report.severity);
        journal.append_event(&event)?;
        let pointer = MessageRecord::new(now, observer, MessageKind::Pointer, summary)
            .with_receipt(receipt)
            .with_severity(report.severity);
        journal.append_message(OPS_CHANNEL, &pointer)?;
    }

    Ok(HeartbeatOutcome {
        report,
        receipt_path,
    })
}

fn classify_managers(
    store: &RecordStore,
    events: &[EventRecord],
    window_secs: u64,
    now: DateTime<Utc>,
) -> Result<Vec<ManagerStatus>, HeartbeatError> {
    let mut managers = Vec::new();
    for agent_id in agent::manager_ids(store)? {
        let last_seen = events
            .iter()
            .filter(|event| {
                event.agent_id == agent_id
                    && event.ts <= now
                    && matches!(event.kind, EventKind::Status | EventKind::Handshake)
            })
            .map(|event| event.ts)
            .max();
        let status = match last_seen {
            None => ManagerStatus {
                agent_id,
                state: ManagerState::Missing,
                last_seen: None,
                age_secs: None,
            },
            Some(ts) => {
                let age_secs = now.signed_duration_since(ts).num_seconds().max(0) as u64;
                let state = if age_secs <= window_secs {
                    ManagerState::Active
                } else {
                    ManagerState::Stale
                };
                ManagerStatus {
                    agent_id,
                    state,
                    last_seen: Some(ts),
                    age_secs: Some(age_secs),
                }
            },
        };
        managers.push(status);
    }
    Ok(managers)
}

fn find_idle_agents(
    store: &RecordStore,
    journal: &Journal,
    events: &[EventRecord],
    window_secs: u64,
    now: DateTime<Utc>,
) -> Result<Vec<IdleAgent>, HeartbeatError> {
    let mut holders: BTreeMap<String, Vec<Claim>> = BTreeMap::new();
    for claim in store.list_claims()? {
        if claim.is_live() {
            holders.entry(claim.agent_id.clone()).or_default().push(claim);
        }
    }
    if holders.is_empty() {
        return Ok(Vec::new());
    }

    let mut last_activity: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
    for event in events {
        if event.ts > now || !holders.contains_key(&event.agent_id) {
            continue;
        }
        note_activity(&mut last_activity, &event.agent_id, event.ts);
    }
    for channel in journal.list_channels()? {
        for message in journal.read_messages(&channel, None)? {
            if message.ts > now || !holders.contains_key(&message.agent_id) {
                continue;
            }
            note_activity(&mut last_activity, &message.agent_id, message.ts);
        }
    }

    let mut idle = Vec::new();
    for (agent_id, claims) in holders {
        // with no journal trace at all, the newest claim write stands in
        let newest_claim = claims.iter().map(|c| c.claimed_at).max();
        let seen = last_activity
            .get(&agent_id)
            .copied()
            .or(newest_claim)
            .unwrap_or(now);
        let idle_secs = now.signed_duration_since(seen).num_seconds().max(0) as u64;
        if idle_secs > window_secs {
            let mut tasks: Vec<String> = claims.into_iter().map(|c| c.task_id).collect();
            tasks.sort();
            idle.push(IdleAgent {
                agent_id,
                idle_secs,
                tasks,
            });
        }
    }
    Ok(idle)
}

fn note_activity(map: &mut BTreeMap<String, DateTime<Utc>>, agent_id: &str, ts: DateTime<Utc>) {
    let entry = map.entry(agent_id.to_string()).or_insert(ts);
    if ts > *entry {
        *entry = ts;
    }
}
