//! Append-only NDJSON logs: events, channel messages, and audit trails.
//!
//! Three log families share one discipline:
//!
//! - `journal/events.jsonl` is the single shared event log.
//! - `journal/messages/<channel>.jsonl` holds one log per named channel.
//! - `journal/audit/<agent_id>.jsonl` holds one guard-outcome log per agent.
//!
//! Every record is one compact JSON object per line. Appends open the file
//! in append mode and write a single line; on POSIX filesystems a short
//! single write does not interleave, so concurrent writers at worst order
//! nondeterministically. Nothing is ever rewritten or truncated.
//!
//! Reads parse the whole log and fail loudly on the first malformed line
//! rather than skipping it.

mod error;
mod record;

pub use error::JournalError;
pub use record::{
    AuditKind, AuditRecord, EventKind, EventRecord, GuardKind, MessageKind, MessageRecord,
    Severity,
};

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::Workspace;
use crate::store;

/// Channel used for operational announcements such as heartbeat alerts.
pub const OPS_CHANNEL: &str = "ops";

/// Maximum accepted size for a single log line, in bytes.
pub const MAX_LINE_SIZE: u64 = 64 * 1024;

/// Append and read access to the journal logs of one workspace.
#[derive(Debug, Clone)]
pub struct Journal {
    events_path: PathBuf,
    messages_dir: PathBuf,
    audit_dir: PathBuf,
}

impl Journal {
    /// Builds a journal over the log directories of `workspace`.
    #[must_use]
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            events_path: workspace.events_path(),
            messages_dir: workspace.messages_dir(),
            audit_dir: workspace.audit_dir(),
        }
    }

    /// Appends one record to the shared event log.
    pub fn append_event(&self, event: &EventRecord) -> Result<(), JournalError> {
        append_line(&self.events_path, event)
    }

    /// Reads the shared event log, oldest first.
    ///
    /// With `since`, only records with `ts >= since` are returned. A log
    /// that does not exist yet reads as empty.
    pub fn read_events(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EventRecord>, JournalError> {
        let records: Vec<EventRecord> = read_lines(&self.events_path, "events")?;
        Ok(filter_since(records, since, |record| record.ts))
    }

    /// Appends one message to a channel log.
    pub fn append_message(
        &self,
        channel: &str,
        message: &MessageRecord,
    ) -> Result<(), JournalError> {
        append_line(&self.channel_path(channel)?, message)
    }

    /// Reads a channel log, oldest first.
    pub fn read_messages(
        &self,
        channel: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRecord>, JournalError> {
        let records: Vec<MessageRecord> = read_lines(&self.channel_path(channel)?, channel)?;
        Ok(filter_since(records, since, |record| record.ts))
    }

    /// Lists every channel that has a message log, sorted by name.
    pub fn list_channels(&self) -> Result<Vec<String>, JournalError> {
        let entries = match std::fs::read_dir(&self.messages_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(JournalError::Io {
                    path: self.messages_dir.clone(),
                    source,
                });
            },
        };
        let mut channels = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| JournalError::Io {
                path: self.messages_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    channels.push(stem.to_string());
                }
            }
        }
        channels.sort();
        Ok(channels)
    }

    /// Appends one guard outcome to the acting agent's audit log.
    pub fn append_audit(&self, record: &AuditRecord) -> Result<(), JournalError> {
        append_line(&self.audit_path(&record.agent_id)?, record)
    }

    /// Reads an agent's audit log, oldest first.
    pub fn read_audit(&self, agent_id: &str) -> Result<Vec<AuditRecord>, JournalError> {
        read_lines(&self.audit_path(agent_id)?, agent_id)
    }

    fn channel_path(&self, channel: &str) -> Result<PathBuf, JournalError> {
        store::validate_id(channel)?;
        Ok(self.messages_dir.join(format!("{channel}.jsonl")))
    }

    fn audit_path(&self, agent_id: &str) -> Result<PathBuf, JournalError> {
        store::validate_id(agent_id)?;
        Ok(self.audit_dir.join(format!("{agent_id}.jsonl")))
    }
}

fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<(), JournalError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|source| JournalError::Io {
        path: parent.to_path_buf(),
        source,
    })?;
    let json = serde_json::to_string(record).map_err(|source| JournalError::Serialize { source })?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| JournalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    writeln!(file, "{json}").map_err(|source| JournalError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_lines<T: DeserializeOwned>(path: &Path, log: &str) -> Result<Vec<T>, JournalError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(JournalError::Io {
                path: path.to_path_buf(),
                source,
            });
        },
    };
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| JournalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        if line.len() as u64 > MAX_LINE_SIZE {
            return Err(JournalError::OversizeLine {
                log: log.to_string(),
                line: index + 1,
                limit: MAX_LINE_SIZE,
            });
        }
        let record = serde_json::from_str(&line).map_err(|source| JournalError::MalformedLine {
            log: log.to_string(),
            line: index + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

fn filter_since<T>(
    records: Vec<T>,
    since: Option<DateTime<Utc>>,
    ts: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    match since {
        Some(since) => records.into_iter().filter(|r| ts(r) >= since).collect(),
        None => records,
    }
}
