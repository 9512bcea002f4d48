//! Record types for the append-only journal logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity scale shared by events, messages, and alerts.
///
/// Ordering follows escalation: `Info < Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

impl Severity {
    /// Returns the wire representation of this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Classification of an event log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Task status change announced by its owner.
    Status,
    /// Agent introducing itself to the workspace.
    Handshake,
    /// Incremental progress on a claimed task.
    Progress,
    /// Result of a verification scan.
    Scan,
    /// Transfer of responsibility between agents.
    Handoff,
    /// Free-form observation.
    Note,
    /// Monitor-raised alert.
    Alert,
    /// Record of a deliberately bypassed guard.
    Override,
}

impl EventKind {
    /// Returns the wire representation of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Handshake => "handshake",
            Self::Progress => "progress",
            Self::Scan => "scan",
            Self::Handoff => "handoff",
            Self::Note => "note",
            Self::Alert => "alert",
            Self::Override => "override",
        }
    }

    /// Whether entries of this kind require ownership of the referenced
    /// task before they may be appended.
    #[must_use]
    pub const fn is_guarded(&self) -> bool {
        matches!(
            self,
            Self::Status | Self::Progress | Self::Scan | Self::Handoff | Self::Note
        )
    }
}

/// One line of the shared event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventRecord {
    /// Timestamp assigned by the writer.
    pub ts: DateTime<Utc>,
    /// Agent the entry speaks for.
    pub agent_id: String,
    /// Entry classification.
    pub kind: EventKind,
    /// One-line human summary.
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Paths of receipts backing this entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receipts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl EventRecord {
    /// Creates an event with the required fields set.
    #[must_use]
    pub fn new(
        ts: DateTime<Utc>,
        agent_id: impl Into<String>,
        kind: EventKind,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            ts,
            agent_id: agent_id.into(),
            kind,
            summary: summary.into(),
            task_id: None,
            plan_id: None,
            branch: None,
            receipts: Vec::new(),
            severity: None,
        }
    }

    /// Attaches a task reference.
    #[must_use]
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Attaches a plan reference.
    #[must_use]
    pub fn with_plan(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    /// Attaches a branch name.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Appends a receipt path.
    #[must_use]
    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipts.push(receipt.into());
        self
    }

    /// Sets the severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Classification of a channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Instruction addressed to the channel.
    Directive,
    /// Reference to a document or receipt elsewhere in the workspace.
    Pointer,
    /// Status report on a claimed task.
    Status,
}

impl MessageKind {
    /// Returns the wire representation of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Directive => "directive",
            Self::Pointer => "pointer",
            Self::Status => "status",
        }
    }

    /// Whether messages of this kind require ownership of the referenced
    /// task before they may be posted.
    #[must_use]
    pub const fn is_guarded(&self) -> bool {
        matches!(self, Self::Status)
    }
}

/// One line of a channel message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageRecord {
    pub ts: DateTime<Utc>,
    pub agent_id: String,
    pub kind: MessageKind,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receipts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl MessageRecord {
    /// Creates a message with the required fields set.
    #[must_use]
    pub fn new(
        ts: DateTime<Utc>,
        agent_id: impl Into<String>,
        kind: MessageKind,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            ts,
            agent_id: agent_id.into(),
            kind,
            summary: summary.into(),
            task_id: None,
            plan_id: None,
            receipts: Vec::new(),
            severity: None,
        }
    }

    /// Attaches a task reference.
    #[must_use]
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Attaches a plan reference.
    #[must_use]
    pub fn with_plan(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    /// Appends a receipt path.
    #[must_use]
    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipts.push(receipt.into());
        self
    }

    /// Sets the severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Classification of an audit log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A guard refused an action.
    Refusal,
    /// A guard was deliberately bypassed.
    Override,
}

impl AuditKind {
    /// Returns the wire representation of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Refusal => "refusal",
            Self::Override => "override",
        }
    }
}

/// The guard an audit entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardKind {
    /// Claim ownership check.
    Ownership,
    /// Task assignment check.
    Assignment,
    /// Session freshness check.
    Session,
}

impl GuardKind {
    /// Returns the wire representation of this guard.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ownership => "ownership",
            Self::Assignment => "assignment",
            Self::Session => "session",
        }
    }
}

/// One line of a per-agent audit log.
///
/// Audit entries record guard outcomes that would otherwise be invisible:
/// refused appends and deliberate bypasses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    /// Agent whose action was judged.
    pub agent_id: String,
    pub kind: AuditKind,
    /// Which guard produced the entry.
    pub guard: GuardKind,
    /// The action that was attempted.
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Owner recorded on the claim at the time of the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_owner: Option<String>,
    /// Claim status at the time of the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditRecord {
    /// Creates a refusal entry.
    #[must_use]
    pub fn refusal(
        ts: DateTime<Utc>,
        agent_id: impl Into<String>,
        guard: GuardKind,
        action: impl Into<String>,
    ) -> Self {
        Self {
            ts,
            agent_id: agent_id.into(),
            kind: AuditKind::Refusal,
            guard,
            action: action.into(),
            task_id: None,
            observed_owner: None,
            observed_status: None,
            detail: None,
        }
    }

    /// Creates a bypass entry for a guard that was overridden.
    #[must_use]
    pub fn bypass(
        ts: DateTime<Utc>,
        agent_id: impl Into<String>,
        guard: GuardKind,
        action: impl Into<String>,
    ) -> Self {
        Self {
            kind: AuditKind::Override,
            ..Self::refusal(ts, agent_id, guard, action)
        }
    }

    /// Attaches a task reference.
    #[must_use]
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Records the claim state observed during the check.
    #[must_use]
    pub fn with_observed(
        mut self,
        owner: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        self.observed_owner = Some(owner.into());
        self.observed_status = Some(status.into());
        self
    }

    /// Attaches free-form detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
