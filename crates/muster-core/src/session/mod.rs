//! Session freshness guard.
//!
//! Agents record a boot receipt when a working session starts. Guarded
//! operations call [`ensure_recent`] to check that the acting agent's
//! receipt is newer than the freshness window before proceeding; an agent
//! whose context may have rotted (or which never booted) is refused.
//!
//! The window comes from, in order of precedence: the caller's explicit
//! `max_age` argument, then the workspace setting (which itself folds in
//! `MUSTER_SESSION_MAX_AGE_SECS` at resolution time). The default is one
//! hour.
//!
//! The guard fails open on request: with the stale-session override set,
//! a missing or stale receipt is waved through and the bypass is written
//! to the agent's audit log instead.

mod error;

pub use error::SessionError;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Workspace;
use crate::journal::{AuditRecord, GuardKind, Journal};
use crate::policy::Override;
use crate::store;

/// Schema tag carried by session boot receipts.
pub const SESSION_RECEIPT_SCHEMA: &str = "muster.session_receipt.v1";

/// Boot receipt for one agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionReceipt {
    /// Always [`SESSION_RECEIPT_SCHEMA`].
    pub schema: String,
    pub agent_id: String,
    pub booted_at: DateTime<Utc>,
}

impl SessionReceipt {
    /// Creates a receipt stamped at `booted_at`.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, booted_at: DateTime<Utc>) -> Self {
        Self {
            schema: SESSION_RECEIPT_SCHEMA.to_string(),
            agent_id: agent_id.into(),
            booted_at,
        }
    }

    /// Receipt age in whole seconds, saturating at zero for receipts
    /// stamped in the future.
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        now.signed_duration_since(self.booted_at)
            .num_seconds()
            .max(0) as u64
    }
}

/// Writes a boot receipt for `agent_id`, replacing any prior one.
pub fn record_boot(
    workspace: &Workspace,
    agent_id: &str,
    now: DateTime<Utc>,
) -> Result<PathBuf, SessionError> {
    store::validate_id(agent_id)?;
    let path = workspace
        .session_receipts_dir()
        .join(format!("{agent_id}.json"));
    let receipt = SessionReceipt::new(agent_id, now);
    store::write_json_document(&path, &receipt)?;
    tracing::debug!(agent_id = %agent_id, "session boot recorded");
    Ok(path)
}

/// Loads the boot receipt for `agent_id`, if one exists.
pub fn load_receipt(
    workspace: &Workspace,
    agent_id: &str,
) -> Result<Option<SessionReceipt>, SessionError> {
    store::validate_id(agent_id)?;
    let path = workspace
        .session_receipts_dir()
        .join(format!("{agent_id}.json"));
    let receipt: Option<SessionReceipt> = store::read_json_document(&path)?;
    if let Some(receipt) = &receipt {
        if receipt.schema != SESSION_RECEIPT_SCHEMA {
            return Err(SessionError::BadSchema {
                agent_id: agent_id.to_string(),
                found: receipt.schema.clone(),
                expected: SESSION_RECEIPT_SCHEMA,
            });
        }
    }
    Ok(receipt)
}

/// Checks that `agent_id` booted within the freshness window.
///
/// `max_age` overrides the workspace window when given. A missing or
/// stale receipt fails unless `overrides.allow_stale_session` is set, in
/// which case the bypass is audited and the check passes.
pub fn ensure_recent(
    workspace: &Workspace,
    journal: &Journal,
    agent_id: &str,
    max_age: Option<u64>,
    overrides: &Override,
    now: DateTime<Utc>,
) -> Result<(), SessionError> {
    let max_age_secs = max_age.unwrap_or_else(|| workspace.session_max_age_secs());
    let failure = match load_receipt(workspace, agent_id)? {
        None => SessionError::Missing {
            agent_id: agent_id.to_string(),
        },
        Some(receipt) => {
            let age_secs = receipt.age_secs(now);
            if age_secs <= max_age_secs {
                return Ok(());
            }
            SessionError::Stale {
                agent_id: agent_id.to_string(),
                age_secs,
                max_age_secs,
            }
        },
    };

    if overrides.allow_stale_session {
        let record = AuditRecord::bypass(now, agent_id, GuardKind::Session, "ensure_recent")
            .with_detail(format!("{failure}; {}", overrides.note_or_default()));
        journal.append_audit(&record)?;
        tracing::warn!(
            agent_id = %agent_id,
            "session freshness bypassed by override"
        );
        return Ok(());
    }
    Err(failure)
}
