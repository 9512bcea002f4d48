//! Strict receipt validation for plan documents.
//!
//! Structural checks run on every mutation; the checks here are heavier
//! and opt-in, meant for review gates rather than the write path. Strict
//! mode confirms that the receipts a plan points at actually back it up:
//! they exist, they parse when they claim to be JSON, they are not listed
//! twice, and the version-control collaborator knows about them.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::store;

use super::{CheckpointState, Plan, PlanError};

/// Version-control view used by strict validation.
///
/// Receipts that exist on disk but are invisible to version control would
/// vanish from reviewers; the tracker is how strict mode notices.
pub trait ReceiptTracker {
    /// Whether the path is tracked.
    fn is_tracked(&self, path: &Path) -> bool;
}

/// Runs every strict check against `plan`.
///
/// Relative receipt paths resolve against `base_dir`. Failures beyond the
/// structural invariants surface as [`PlanError::Checklist`].
pub fn validate_strict(
    plan: &Plan,
    base_dir: &Path,
    tracker: &dyn ReceiptTracker,
) -> Result<(), PlanError> {
    plan.validate_structure()?;

    if plan.checkpoint.status == CheckpointState::Satisfied && plan.receipts.is_empty() {
        return Err(PlanError::Checklist {
            detail: format!(
                "plan {} checkpoint is satisfied but carries no receipts",
                plan.plan_id
            ),
        });
    }

    check_scope(&plan.plan_id, "plan", &plan.receipts, base_dir, tracker)?;
    for step in &plan.steps {
        check_scope(
            &plan.plan_id,
            &format!("step {}", step.id),
            &step.receipts,
            base_dir,
            tracker,
        )?;
    }
    Ok(())
}

fn check_scope(
    plan_id: &str,
    scope: &str,
    receipts: &[String],
    base_dir: &Path,
    tracker: &dyn ReceiptTracker,
) -> Result<(), PlanError> {
    let mut seen = BTreeSet::new();
    for receipt in receipts {
        if !seen.insert(receipt.as_str()) {
            return Err(PlanError::Checklist {
                detail: format!("plan {plan_id} {scope} lists receipt {receipt} twice"),
            });
        }
        let path = resolve(base_dir, receipt);
        if !path.is_file() {
            return Err(PlanError::Checklist {
                detail: format!("plan {plan_id} {scope} receipt {receipt} does not exist"),
            });
        }
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            if let Err(err) = store::read_json_document::<serde_json::Value>(&path) {
                return Err(PlanError::Checklist {
                    detail: format!("plan {plan_id} {scope} receipt {receipt} is not valid JSON: {err}"),
                });
            }
        }
        if !tracker.is_tracked(&path) {
            return Err(PlanError::Checklist {
                detail: format!(
                    "plan {plan_id} {scope} receipt {receipt} is not tracked by version control"
                ),
            });
        }
    }
    Ok(())
}

fn resolve(base_dir: &Path, receipt: &str) -> PathBuf {
    let path = Path::new(receipt);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
