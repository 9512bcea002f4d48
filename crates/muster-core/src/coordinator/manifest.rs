//! Step manifests: the work order handed to a worker harness.
//!
//! A manifest is built fresh for every cycle from the plan document and
//! persisted under the coordinator receipts directory before any
//! readiness check runs, so even a tripped cycle leaves a record of what
//! would have been executed.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Workspace;
use crate::plan::{Plan, Step};
use crate::store::{self, StoreError};

/// Schema tag written into every step manifest.
pub const STEP_MANIFEST_SCHEMA: &str = "muster.step_manifest.v1";

/// Declarative descriptor of one coordinator step: the recommended
/// operation sequence plus the receipt paths the step is expected to
/// leave behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepManifest {
    pub schema: String,
    pub plan_id: String,
    pub step_id: String,
    pub title: String,
    /// Manager identity the cycle ran under.
    pub manager_agent: String,
    pub generated_at: DateTime<Utc>,
    /// Recommended operations, in execution order.
    pub commands: Vec<String>,
    /// Receipt paths the step is expected to produce.
    pub expected_receipts: Vec<String>,
}

impl StepManifest {
    /// Builds the manifest for `step` within `plan`.
    #[must_use]
    pub fn build(plan: &Plan, step: &Step, manager_agent: &str, now: DateTime<Utc>) -> Self {
        let plan_id = plan.plan_id.as_str();
        let step_id = step.id.as_str();
        let commands = vec![
            format!("step_set_status {plan_id} {step_id} in_progress"),
            format!("log_event progress {plan_id}/{step_id}"),
            format!("step_set_status {plan_id} {step_id} done"),
        ];
        Self {
            schema: STEP_MANIFEST_SCHEMA.to_string(),
            plan_id: plan_id.to_string(),
            step_id: step_id.to_string(),
            title: step.title.clone(),
            manager_agent: manager_agent.to_string(),
            generated_at: now,
            commands,
            expected_receipts: step.receipts.clone(),
        }
    }

    /// File name the manifest persists under.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}-{}.manifest.json", self.plan_id, self.step_id)
    }

    /// Writes the manifest into the coordinator receipts directory and
    /// returns the path.
    pub fn persist(&self, workspace: &Workspace) -> Result<PathBuf, StoreError> {
        let path = workspace.coordinator_receipts_dir().join(self.file_name());
        store::write_json_document(&path, self)?;
        Ok(path)
    }
}
