//! Multi-agent conflict detector.
//!
//! Answers one question for an agent about to start work: how occupied is
//! this workspace by other agents right now? The answer is a
//! [`ParallelStateReport`] with a single headline severity:
//!
//! ```text
//! hard   a foreign live claim exists, or foreign activity within the
//!        hard window
//! soft   foreign activity within the soft window
//! stale  foreign activity within the stale window
//! none   nothing foreign seen inside the stale window
//! ```
//!
//! A foreign live claim forces `hard` unconditionally; event recency never
//! softens it. Detection is read-only and evaluated at call time, not a
//! running watcher.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::claim::ClaimStatus;
use crate::journal::{Journal, JournalError};
use crate::policy::ConflictPolicy;
use crate::store::{RecordStore, StoreError};

/// Errors surfaced while gathering conflict inputs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConflictError {
    /// Reading claim records failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reading the event log failed.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Headline severity of a conflict report.
///
/// Ordering follows escalation: `None < Stale < Soft < Hard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    None,
    Stale,
    Soft,
    Hard,
}

impl ConflictSeverity {
    /// Returns the wire representation of this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Stale => "stale",
            Self::Soft => "soft",
            Self::Hard => "hard",
        }
    }
}

/// Foreign live claim noted in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeignClaimSummary {
    pub task_id: String,
    pub agent_id: String,
    pub status: ClaimStatus,
}

/// Pre-work requirements derived from the severity and policy flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Requirements {
    /// A fresh session boot is expected before acting.
    pub session_boot: bool,
    /// Claiming a plan first is expected before acting.
    pub plan_claim: bool,
    /// A post-run scan receipt is expected after acting.
    pub post_run_scan: bool,
}

/// What the detector saw from one agent's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParallelStateReport {
    /// Agent the report was computed for.
    pub agent_id: String,
    pub severity: ConflictSeverity,
    /// Agents whose most recent foreign event falls in the hard window.
    pub hard_agents: Vec<String>,
    /// Agents whose most recent foreign event falls in the soft window.
    pub soft_agents: Vec<String>,
    /// Agents whose most recent foreign event falls in the stale window.
    pub stale_agents: Vec<String>,
    /// Live claims held by other agents.
    pub active_claims: Vec<ForeignClaimSummary>,
    pub requirements: Requirements,
}

/// Computes a conflict report for `agent_id` at `now`.
///
/// Each foreign agent is bucketed once, by the age of its most recent
/// event inside the stale window; the agent's own events are ignored.
pub fn detect(
    store: &RecordStore,
    journal: &Journal,
    policy: &ConflictPolicy,
    agent_id: &str,
    now: DateTime<Utc>,
) -> Result<ParallelStateReport, ConflictError> {
    let active_claims: Vec<ForeignClaimSummary> = store
        .list_claims()?
        .into_iter()
        .filter(|claim| claim.agent_id != agent_id && claim.is_live())
        .map(|claim| ForeignClaimSummary {
            task_id: claim.task_id,
            agent_id: claim.agent_id,
            status: claim.status,
        })
        .collect();

    let since = now - Duration::seconds(policy.stale_window_secs as i64);
    let mut latest_foreign: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
    for event in journal.read_events(Some(since))? {
        if event.agent_id == agent_id || event.ts > now {
            continue;
        }
        let entry = latest_foreign.entry(event.agent_id).or_insert(event.ts);
        if event.ts > *entry {
            *entry = event.ts;
        }
    }

    let mut hard_agents = Vec::new();
    let mut soft_agents = Vec::new();
    let mut stale_agents = Vec::new();
    for (agent, ts) in latest_foreign {
        let age_secs = now.signed_duration_since(ts).num_seconds().max(0) as u64;
        if age_secs <= policy.hard_window_secs {
            hard_agents.push(agent);
        } else if age_secs <= policy.soft_window_secs {
            soft_agents.push(agent);
        } else {
            stale_agents.push(agent);
        }
    }

    let severity = if !active_claims.is_empty() || !hard_agents.is_empty() {
        ConflictSeverity::Hard
    } else if !soft_agents.is_empty() {
        ConflictSeverity::Soft
    } else if !stale_agents.is_empty() {
        ConflictSeverity::Stale
    } else {
        ConflictSeverity::None
    };

    let requirements = Requirements {
        session_boot: severity >= ConflictSeverity::Soft,
        plan_claim: severity == ConflictSeverity::Hard && policy.require_plan_claim,
        post_run_scan: severity == ConflictSeverity::Hard && policy.require_scan_receipt,
    };

    tracing::debug!(
        agent_id = %agent_id,
        severity = severity.as_str(),
        foreign_claims = active_claims.len(),
        "conflict report computed"
    );
    Ok(ParallelStateReport {
        agent_id: agent_id.to_string(),
        severity,
        hard_agents,
        soft_agents,
        stale_agents,
        active_claims,
        requirements,
    })
}
