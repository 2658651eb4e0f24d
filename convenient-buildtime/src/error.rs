//! Error types for the build-time engine
//!
//! These errors never cross into the build being observed. They are returned
//! by the fallible internals (history file I/O, configuration loading, resource
//! probes) and turned into log lines by the run coordinator.

use std::path::PathBuf;

/// Result of a fallible engine operation
pub type BuildTimeResult<T> = Result<T, BuildTimeError>;

/// Errors raised inside the engine
#[derive(Debug, thiserror::Error)]
pub enum BuildTimeError {
    /// Reading or writing a file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// History JSON could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration YAML could not be parsed
    #[error("Config parse error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// Configuration values are out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single resource reading failed
    #[error("Sampling error: {0}")]
    Sampling(String),

    /// The history file could not be replaced
    #[error("Failed to persist history to {path}: {reason}")]
    Persist {
        /// Destination file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },
}
