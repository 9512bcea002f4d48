//! # muster-core
//!
//! File-based coordination substrate for fleets of coding agents sharing
//! one repository.
//!
//! Agents (and their human operators) coordinate through a workspace
//! directory of JSON documents and newline-delimited logs. There is no
//! server: every operation is a synchronous function that reads and
//! writes those files directly, and concurrency is only separate
//! processes touching the same paths at overlapping times. This crate
//! gives that shared directory its discipline:
//!
//! - [`config`]: workspace layout and TOML configuration.
//! - [`store`]: bounded, atomic, deterministic JSON document I/O.
//! - [`journal`]: append-only event, message, and audit logs.
//! - [`agent`]: agent manifests and manager resolution.
//! - [`claim`]: exclusive task ownership, the assignment gate, and the
//!   ownership guard over journal writes.
//! - [`policy`]: conflict windows, policy flags, and audited overrides.
//! - [`conflict`]: parallel-work detection with severity buckets.
//! - [`heartbeat`]: manager liveness and idle-agent alerts.
//! - [`session`]: session boot receipts and the freshness guard.
//! - [`plan`]: plan/step state machine with strict receipt validation.
//! - [`coordinator`]: guarded step execution, backlog loop, and service
//!   supervision behind a circuit breaker.
//!
//! Guards fail fast and nothing is retried internally. Every override of
//! a guard is appended to the audit log instead of being silently
//! allowed, so a bypass is always discoverable after the fact.
//!
//! ## Example
//!
//! ```no_run
//! use muster_core::claim::{ClaimRequest, claim_task};
//! use muster_core::config::Workspace;
//! use muster_core::journal::Journal;
//! use muster_core::policy::Override;
//! use muster_core::store::RecordStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let workspace = Workspace::open(".")?;
//! workspace.ensure_layout()?;
//! let store = RecordStore::new(&workspace);
//! let journal = Journal::new(&workspace);
//!
//! let request = ClaimRequest::new("QUEUE-7", "codex-3").with_branch("feat/queue-7");
//! claim_task(&store, &journal, &request, &Override::none(), chrono::Utc::now())?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod agent;
pub mod claim;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod heartbeat;
pub mod journal;
pub mod plan;
pub mod policy;
pub mod session;
pub mod store;

// Re-export the main types at the crate root for convenience.
pub use agent::{AgentManifest, AgentRole};
pub use claim::{Assignment, Claim, ClaimError, ClaimRequest, ClaimStatus};
pub use config::{ConfigError, Workspace, WorkspaceConfig};
pub use conflict::{ConflictSeverity, ParallelStateReport};
pub use coordinator::CoordinatorError;
pub use heartbeat::{HeartbeatReport, HeartbeatWindows};
pub use journal::{
    AuditRecord, EventKind, EventRecord, Journal, JournalError, MessageKind, MessageRecord,
    Severity,
};
pub use plan::{Plan, PlanError, PlanState, Step};
pub use policy::{ConflictPolicy, Override, PolicyError};
pub use session::{SessionError, SessionReceipt};
pub use store::{RecordStore, StoreError};
