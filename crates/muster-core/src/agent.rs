//! Agent manifests and manager resolution.
//!
//! Agents announce themselves with a manifest document under
//! `records/manifests/<agent_id>.json`. The manifest is advisory; agents
//! without one can still claim tasks. Its main job is role discovery:
//! the heartbeat monitor and the coordinator need to know which agents
//! are expected to act as managers.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::store::{RecordStore, StoreError};

/// Role an agent volunteers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Coordinates work and is expected to heartbeat.
    Manager,
    /// Executes claimed tasks.
    Worker,
}

impl AgentRole {
    /// Returns the wire representation of this role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Worker => "worker",
        }
    }
}

/// Self-description document for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentManifest {
    pub agent_id: String,
    /// Roles the agent volunteers for. May be empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<AgentRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl AgentManifest {
    /// Creates a manifest with no roles.
    #[must_use]
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            roles: Vec::new(),
            notes: None,
        }
    }

    /// Adds a role.
    #[must_use]
    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.roles.push(role);
        self
    }

    /// Attaches free-form notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Whether the agent volunteers as a manager.
    #[must_use]
    pub fn is_manager(&self) -> bool {
        self.roles.contains(&AgentRole::Manager)
    }
}

/// Collects every agent id expected to act as a manager.
///
/// The set is the union of manifests carrying the manager role and
/// `manager` fields found on assignment documents, sorted by id.
pub fn manager_ids(store: &RecordStore) -> Result<BTreeSet<String>, StoreError> {
    let mut ids = BTreeSet::new();
    for manifest in store.list_manifests()? {
        if manifest.is_manager() {
            ids.insert(manifest.agent_id);
        }
    }
    for assignment in store.list_assignments()? {
        if let Some(manager) = assignment.manager {
            ids.insert(manager);
        }
    }
    Ok(ids)
}

/// Resolves the acting manager: the first manager id in sorted order,
/// or `None` when the workspace names no managers.
pub fn resolve_manager(store: &RecordStore) -> Result<Option<String>, StoreError> {
    Ok(manager_ids(store)?.into_iter().next())
}
