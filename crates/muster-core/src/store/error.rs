//! Record store error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by document reads and writes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// An identifier is unusable as a file name.
    #[error("invalid identifier {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },

    /// A filesystem operation failed.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A document exists but is not valid JSON for its schema.
    #[error("malformed document {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Serializing a document failed.
    #[error("failed to serialize document: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },

    /// A document exceeds the size limit.
    #[error("document {path} exceeds maximum size of {limit} bytes")]
    Oversize { path: PathBuf, limit: u64 },

    /// The path exists but is not a regular file.
    #[error("refusing non-regular file at {path}")]
    NotAFile { path: PathBuf },
}
