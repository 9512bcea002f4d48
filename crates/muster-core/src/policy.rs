//! Conflict policy document and guard override switches.
//!
//! The conflict policy lives at `policy.json` under the workspace root and
//! tunes the age windows the conflict detector buckets foreign activity
//! into. A missing document means defaults; a present document replaces
//! them wholesale. Windows must be strictly ordered, hard < soft < stale.
//!
//! [`Override`] is the single escape hatch for the guards. Bypasses are
//! deliberate and always leave an audit entry, so the struct carries a
//! note explaining the bypass alongside the switches themselves.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{self, StoreError};

/// Default window treating foreign activity as a hard conflict, in seconds.
pub const DEFAULT_HARD_WINDOW_SECS: u64 = 1800;

/// Default window treating foreign activity as a soft overlap, in seconds.
pub const DEFAULT_SOFT_WINDOW_SECS: u64 = 7200;

/// Default window beyond which foreign activity is merely stale, in seconds.
pub const DEFAULT_STALE_WINDOW_SECS: u64 = 21600;

/// Environment kill switch that disables the session freshness guard.
pub const ENV_SESSION_GUARD_DISABLED: &str = "MUSTER_SESSION_GUARD_DISABLED";

/// Errors surfaced while loading or validating the conflict policy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PolicyError {
    /// Reading the policy document failed.
    #[error("failed to read conflict policy: {source}")]
    Store {
        #[from]
        source: StoreError,
    },

    /// The windows are not strictly ordered.
    #[error(
        "conflict windows must satisfy hard < soft < stale, \
         got hard={hard_secs} soft={soft_secs} stale={stale_secs}"
    )]
    WindowOrder {
        hard_secs: u64,
        soft_secs: u64,
        stale_secs: u64,
    },

    /// A window is zero.
    #[error("conflict windows must be positive")]
    ZeroWindow,
}

/// Tuning knobs for the conflict detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConflictPolicy {
    /// Foreign activity at most this old is a hard conflict.
    pub hard_window_secs: u64,
    /// Foreign activity at most this old is a soft overlap.
    pub soft_window_secs: u64,
    /// Foreign activity at most this old is stale; older is ignored.
    pub stale_window_secs: u64,
    /// Whether agents are expected to claim a plan before execution.
    pub require_plan_claim: bool,
    /// Whether agents are expected to record a scan receipt after execution.
    pub require_scan_receipt: bool,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            hard_window_secs: DEFAULT_HARD_WINDOW_SECS,
            soft_window_secs: DEFAULT_SOFT_WINDOW_SECS,
            stale_window_secs: DEFAULT_STALE_WINDOW_SECS,
            require_plan_claim: true,
            require_scan_receipt: true,
        }
    }
}

impl ConflictPolicy {
    /// Loads the policy document at `path`, or defaults when absent.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        match store::read_json_document::<Self>(path)? {
            Some(policy) => {
                policy.validate()?;
                Ok(policy)
            },
            None => Ok(Self::default()),
        }
    }

    /// Checks the window ordering invariant.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.hard_window_secs == 0 {
            return Err(PolicyError::ZeroWindow);
        }
        if self.hard_window_secs >= self.soft_window_secs
            || self.soft_window_secs >= self.stale_window_secs
        {
            return Err(PolicyError::WindowOrder {
                hard_secs: self.hard_window_secs,
                soft_secs: self.soft_window_secs,
                stale_secs: self.stale_window_secs,
            });
        }
        Ok(())
    }
}

/// Deliberate guard bypass switches.
///
/// The default value bypasses nothing. Every switch that fires during a
/// guarded operation produces an audit entry naming the bypassed guard,
/// so overrides are visible after the fact even when they succeed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Override {
    /// Permit actions despite a stale or missing session boot receipt.
    pub allow_stale_session: bool,
    /// Permit claiming a task that has an assignment naming another agent,
    /// or no assignment where one is expected.
    pub allow_unassigned: bool,
    /// Why the bypass was requested. Copied into audit entries.
    pub note: Option<String>,
}

impl Override {
    /// An override that bypasses nothing.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether any switch is set.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.allow_stale_session || self.allow_unassigned
    }

    /// Sets the stale-session switch.
    #[must_use]
    pub const fn allow_stale_session(mut self) -> Self {
        self.allow_stale_session = true;
        self
    }

    /// Sets the unassigned-claim switch.
    #[must_use]
    pub const fn allow_unassigned(mut self) -> Self {
        self.allow_unassigned = true;
        self
    }

    /// Attaches an explanation carried into audit entries.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Folds the environment kill switch into this override.
    ///
    /// `MUSTER_SESSION_GUARD_DISABLED=1` (or `true`/`yes`) sets the
    /// stale-session switch. Intended to be called once at process entry.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        let disabled = std::env::var(ENV_SESSION_GUARD_DISABLED)
            .map(|raw| {
                let raw = raw.trim().to_ascii_lowercase();
                raw == "1" || raw == "true" || raw == "yes"
            })
            .unwrap_or(false);
        if disabled {
            self.allow_stale_session = true;
            if self.note.is_none() {
                self.note = Some(format!("{ENV_SESSION_GUARD_DISABLED} set"));
            }
        }
        self
    }

    /// The note, or a fixed placeholder for audit entries.
    #[must_use]
    pub fn note_or_default(&self) -> &str {
        self.note.as_deref().unwrap_or("no reason given")
    }
}
