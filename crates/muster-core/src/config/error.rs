//! Configuration error types.

use thiserror::Error;

/// Errors surfaced while loading or validating workspace configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Reading the settings file failed.
    #[error("failed to read configuration: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML or has unknown fields.
    #[error("failed to parse configuration: {source}")]
    Parse {
        #[source]
        source: toml::de::Error,
    },

    /// Serializing the configuration back to TOML failed.
    #[error("failed to serialize configuration: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },

    /// The settings are structurally invalid.
    #[error("invalid configuration: {reason}")]
    Validation { reason: String },
}
