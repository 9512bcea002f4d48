//! Journal error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced while appending to or reading journal logs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JournalError {
    /// A channel or agent name is unusable as a log file name.
    #[error("invalid log name: {source}")]
    InvalidName {
        #[from]
        source: StoreError,
    },

    /// A filesystem operation failed.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serializing a record failed.
    #[error("failed to serialize journal record: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },

    /// A log line is not valid JSON for its record schema.
    ///
    /// The line number is 1-based. The log keeps append-only semantics, so
    /// a malformed line indicates either an interrupted write or a foreign
    /// writer; the error names the line so it can be inspected in place.
    #[error("malformed line {line} in {log}: {source}")]
    MalformedLine {
        log: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A log line exceeds the per-line size limit.
    #[error("line {line} in {log} exceeds {limit} bytes")]
    OversizeLine { log: String, line: usize, limit: u64 },
}
