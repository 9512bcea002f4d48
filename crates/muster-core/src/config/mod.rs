//! Workspace configuration and on-disk layout.
//!
//! A muster workspace is a directory tree rooted at a single path:
//!
//! ```text
//! <root>/
//!   muster.toml            optional settings file
//!   policy.json            optional conflict policy document
//!   records/
//!     claims/<task_id>.json
//!     assignments/<task_id>.json
//!     manifests/<agent_id>.json
//!     plans/<plan_id>.json
//!   journal/
//!     events.jsonl
//!     messages/<channel>.jsonl
//!     audit/<agent_id>.jsonl
//!   receipts/
//!     sessions/<agent_id>.json
//!     heartbeat/
//!     coordinator/
//! ```
//!
//! [`WorkspaceConfig`] is the serde view of `muster.toml`. [`Workspace`] is the
//! resolved form: absolute paths plus effective settings after environment
//! overrides. Resolution happens once, at construction; nothing else in the
//! crate reads the environment.

mod error;

pub use error::ConfigError;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Settings file name looked up under the workspace root.
pub const CONFIG_FILENAME: &str = "muster.toml";

/// Default maximum session age before the freshness guard refuses, in seconds.
pub const DEFAULT_SESSION_MAX_AGE_SECS: u64 = 3600;

/// Default freshness window for manager heartbeats, in seconds.
pub const DEFAULT_MANAGER_WINDOW_SECS: u64 = 1800;

/// Default idle window before a claim-holding agent is flagged, in seconds.
pub const DEFAULT_AGENT_WINDOW_SECS: u64 = 3600;

/// Environment override for the session freshness window.
pub const ENV_SESSION_MAX_AGE: &str = "MUSTER_SESSION_MAX_AGE_SECS";

/// Maximum accepted size for `muster.toml`, in bytes.
pub const MAX_CONFIG_SIZE: u64 = 64 * 1024;

/// Serde view of `muster.toml`. Every field has a default so an empty or
/// absent file yields a fully usable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct WorkspaceConfig {
    /// Directory names relative to the workspace root.
    pub dirs: DirsConfig,
    /// Session freshness guard settings.
    pub session: SessionConfig,
    /// Heartbeat monitor windows.
    pub heartbeat: HeartbeatConfig,
    /// Conflict policy document location.
    pub policy: PolicyConfig,
}

/// Directory layout section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct DirsConfig {
    pub records: String,
    pub journal: String,
    pub receipts: String,
}

impl Default for DirsConfig {
    fn default() -> Self {
        Self {
            records: "records".to_string(),
            journal: "journal".to_string(),
            receipts: "receipts".to_string(),
        }
    }
}

/// Session freshness section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SessionConfig {
    /// Maximum age of a boot receipt before the guard refuses, in seconds.
    pub max_age_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: DEFAULT_SESSION_MAX_AGE_SECS,
        }
    }
}

/// Heartbeat monitor section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct HeartbeatConfig {
    /// Freshness window for manager heartbeats, in seconds.
    pub manager_window_secs: u64,
    /// Idle window for agents holding active claims, in seconds.
    pub agent_window_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            manager_window_secs: DEFAULT_MANAGER_WINDOW_SECS,
            agent_window_secs: DEFAULT_AGENT_WINDOW_SECS,
        }
    }
}

/// Conflict policy section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct PolicyConfig {
    /// Policy document path relative to the workspace root.
    pub file: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            file: "policy.json".to_string(),
        }
    }
}

impl WorkspaceConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file, or defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) => {
                if meta.len() > MAX_CONFIG_SIZE {
                    return Err(ConfigError::Validation {
                        reason: format!(
                            "{} exceeds {MAX_CONFIG_SIZE} bytes",
                            path.display()
                        ),
                    });
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            },
            Err(source) => return Err(ConfigError::Io { source }),
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { source })?;
        Self::from_toml(&text)
    }

    /// Serializes the configuration to TOML text.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("dirs.records", &self.dirs.records),
            ("dirs.journal", &self.dirs.journal),
            ("dirs.receipts", &self.dirs.receipts),
            ("policy.file", &self.policy.file),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Validation {
                    reason: format!("{field} must not be empty"),
                });
            }
            if Path::new(value).is_absolute() || value.contains("..") {
                return Err(ConfigError::Validation {
                    reason: format!("{field} must be a plain relative path, got {value:?}"),
                });
            }
        }
        if self.session.max_age_secs == 0 {
            return Err(ConfigError::Validation {
                reason: "session.max_age_secs must be positive".to_string(),
            });
        }
        if self.heartbeat.manager_window_secs == 0 || self.heartbeat.agent_window_secs == 0 {
            return Err(ConfigError::Validation {
                reason: "heartbeat windows must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolved workspace: absolute paths plus effective settings.
///
/// Constructed once and passed by reference to every component that touches
/// the filesystem. There is no global instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    root: PathBuf,
    records_dir: PathBuf,
    journal_dir: PathBuf,
    receipts_dir: PathBuf,
    policy_path: PathBuf,
    session_max_age_secs: u64,
    manager_window_secs: u64,
    agent_window_secs: u64,
}

impl Workspace {
    /// Resolves a workspace from an explicit configuration.
    ///
    /// `MUSTER_SESSION_MAX_AGE_SECS`, when set to a positive integer,
    /// overrides the configured session window. A malformed value is
    /// ignored rather than failing resolution.
    #[must_use]
    pub fn resolve(root: impl Into<PathBuf>, config: &WorkspaceConfig) -> Self {
        let root = root.into();
        let session_max_age_secs = std::env::var(ENV_SESSION_MAX_AGE)
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(config.session.max_age_secs);
        Self {
            records_dir: root.join(&config.dirs.records),
            journal_dir: root.join(&config.dirs.journal),
            receipts_dir: root.join(&config.dirs.receipts),
            policy_path: root.join(&config.policy.file),
            session_max_age_secs,
            manager_window_secs: config.heartbeat.manager_window_secs,
            agent_window_secs: config.heartbeat.agent_window_secs,
            root,
        }
    }

    /// Opens a workspace rooted at `root`, reading `muster.toml` when present.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        let config = WorkspaceConfig::load(&root.join(CONFIG_FILENAME))?;
        Ok(Self::resolve(root, &config))
    }

    /// Creates the directory layout if it does not exist yet.
    pub fn ensure_layout(&self) -> Result<(), ConfigError> {
        for dir in [
            self.claims_dir(),
            self.assignments_dir(),
            self.manifests_dir(),
            self.plans_dir(),
            self.messages_dir(),
            self.audit_dir(),
            self.session_receipts_dir(),
            self.heartbeat_receipts_dir(),
            self.coordinator_receipts_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Io { source })?;
        }
        Ok(())
    }

    /// Workspace root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Conflict policy document path.
    #[must_use]
    pub fn policy_path(&self) -> &Path {
        &self.policy_path
    }

    /// Effective session freshness window, in seconds.
    #[must_use]
    pub const fn session_max_age_secs(&self) -> u64 {
        self.session_max_age_secs
    }

    /// Manager heartbeat freshness window, in seconds.
    #[must_use]
    pub const fn manager_window_secs(&self) -> u64 {
        self.manager_window_secs
    }

    /// Agent idle window, in seconds.
    #[must_use]
    pub const fn agent_window_secs(&self) -> u64 {
        self.agent_window_secs
    }

    /// Directory holding claim documents.
    #[must_use]
    pub fn claims_dir(&self) -> PathBuf {
        self.records_dir.join("claims")
    }

    /// Directory holding assignment documents.
    #[must_use]
    pub fn assignments_dir(&self) -> PathBuf {
        self.records_dir.join("assignments")
    }

    /// Directory holding agent manifests.
    #[must_use]
    pub fn manifests_dir(&self) -> PathBuf {
        self.records_dir.join("manifests")
    }

    /// Directory holding plan documents.
    #[must_use]
    pub fn plans_dir(&self) -> PathBuf {
        self.records_dir.join("plans")
    }

    /// Shared event log path.
    #[must_use]
    pub fn events_path(&self) -> PathBuf {
        self.journal_dir.join("events.jsonl")
    }

    /// Directory holding per-channel message logs.
    #[must_use]
    pub fn messages_dir(&self) -> PathBuf {
        self.journal_dir.join("messages")
    }

    /// Directory holding per-agent audit logs.
    #[must_use]
    pub fn audit_dir(&self) -> PathBuf {
        self.journal_dir.join("audit")
    }

    /// Directory holding session boot receipts.
    #[must_use]
    pub fn session_receipts_dir(&self) -> PathBuf {
        self.receipts_dir.join("sessions")
    }

    /// Directory holding heartbeat reports.
    #[must_use]
    pub fn heartbeat_receipts_dir(&self) -> PathBuf {
        self.receipts_dir.join("heartbeat")
    }

    /// Directory holding coordinator cycle receipts and step manifests.
    #[must_use]
    pub fn coordinator_receipts_dir(&self) -> PathBuf {
        self.receipts_dir.join("coordinator")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips() {
        let config = WorkspaceConfig::default();
        let toml = config.to_toml().unwrap();
        let parsed = WorkspaceConfig::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = WorkspaceConfig::from_toml("").unwrap();
        assert_eq!(config, WorkspaceConfig::default());
        assert_eq!(config.session.max_age_secs, DEFAULT_SESSION_MAX_AGE_SECS);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = WorkspaceConfig::from_toml("nonsense = true").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn absolute_dir_is_rejected() {
        let err = WorkspaceConfig::from_toml("[dirs]\nrecords = \"/etc\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn parent_traversal_is_rejected() {
        let err = WorkspaceConfig::from_toml("[dirs]\njournal = \"../journal\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn zero_session_window_is_rejected() {
        let err = WorkspaceConfig::from_toml("[session]\nmax_age_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkspaceConfig::load(&dir.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(config, WorkspaceConfig::default());
    }

    #[test]
    fn load_reads_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[session]\nmax_age_secs = 120\n").unwrap();
        let config = WorkspaceConfig::load(&path).unwrap();
        assert_eq!(config.session.max_age_secs, 120);
    }

    #[test]
    fn workspace_paths_hang_off_root() {
        let ws = Workspace::resolve("/tmp/ws", &WorkspaceConfig::default());
        assert_eq!(ws.claims_dir(), Path::new("/tmp/ws/records/claims"));
        assert_eq!(ws.events_path(), Path::new("/tmp/ws/journal/events.jsonl"));
        assert_eq!(
            ws.session_receipts_dir(),
            Path::new("/tmp/ws/receipts/sessions")
        );
        assert_eq!(ws.policy_path(), Path::new("/tmp/ws/policy.json"));
    }

    #[test]
    fn ensure_layout_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::resolve(dir.path(), &WorkspaceConfig::default());
        ws.ensure_layout().unwrap();
        assert!(ws.claims_dir().is_dir());
        assert!(ws.audit_dir().is_dir());
        assert!(ws.coordinator_receipts_dir().is_dir());
    }
}
