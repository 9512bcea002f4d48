//! Ownership guard: the check between an agent and a guarded append.
//!
//! Guarded event and message kinds speak *about* a task, so they must come
//! from the agent that owns it. The guard loads the claim and decides:
//!
//! ```text
//! no claim                      refuse (MissingClaim, audited)
//! terminal claim                allow, any agent
//! live claim, same owner        allow
//! live claim, different owner   refuse (ForeignClaim, audited)
//! ```
//!
//! Refusals write an audit entry to the acting agent's log *before* the
//! error is returned, so the refusal survives even when the caller's
//! error output is lost.

use chrono::Utc;

use crate::journal::{AuditRecord, EventRecord, GuardKind, Journal, MessageRecord};
use crate::store::RecordStore;

use super::ClaimError;

/// Checks that `agent_id` may perform a guarded `action` on `task_id`.
///
/// Terminal claims always pass, regardless of who asks. The `action`
/// string names the attempted operation in audit entries and errors.
pub fn ensure_owner(
    store: &RecordStore,
    journal: &Journal,
    task_id: &str,
    agent_id: &str,
    action: &str,
) -> Result<(), ClaimError> {
    let claim = match store.load_claim(task_id)? {
        Some(claim) => claim,
        None => {
            let record = AuditRecord::refusal(Utc::now(), agent_id, GuardKind::Ownership, action)
                .with_task(task_id)
                .with_detail("no claim recorded");
            journal.append_audit(&record)?;
            tracing::warn!(
                task_id = %task_id,
                agent_id = %agent_id,
                action = %action,
                "guarded action refused: no claim"
            );
            return Err(ClaimError::MissingClaim {
                task_id: task_id.to_string(),
                action: action.to_string(),
            });
        },
    };

    if claim.is_terminal() {
        return Ok(());
    }
    if claim.agent_id == agent_id {
        return Ok(());
    }

    let record = AuditRecord::refusal(Utc::now(), agent_id, GuardKind::Ownership, action)
        .with_task(task_id)
        .with_observed(&claim.agent_id, claim.status.as_str());
    journal.append_audit(&record)?;
    tracing::warn!(
        task_id = %task_id,
        agent_id = %agent_id,
        owner = %claim.agent_id,
        action = %action,
        "guarded action refused: foreign claim"
    );
    Err(ClaimError::ForeignClaim {
        task_id: task_id.to_string(),
        owner: claim.agent_id,
        status: claim.status,
        action: action.to_string(),
    })
}

/// Appends an event, first passing guarded kinds through [`ensure_owner`].
///
/// Kinds that are not guarded, and guarded kinds with no task reference,
/// append without a check.
pub fn log_event(
    store: &RecordStore,
    journal: &Journal,
    event: &EventRecord,
) -> Result<(), ClaimError> {
    if event.kind.is_guarded() {
        if let Some(task_id) = &event.task_id {
            let action = format!("log_event:{}", event.kind.as_str());
            ensure_owner(store, journal, task_id, &event.agent_id, &action)?;
        }
    }
    journal.append_event(event)?;
    Ok(())
}

/// Posts a channel message, first passing guarded kinds through
/// [`ensure_owner`].
pub fn post_message(
    store: &RecordStore,
    journal: &Journal,
    channel: &str,
    message: &MessageRecord,
) -> Result<(), ClaimError> {
    if message.kind.is_guarded() {
        if let Some(task_id) = &message.task_id {
            let action = format!("post_message:{}", message.kind.as_str());
            ensure_owner(store, journal, task_id, &message.agent_id, &action)?;
        }
    }
    journal.append_message(channel, message)?;
    Ok(())
}
