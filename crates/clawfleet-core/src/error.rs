//! Error types for spec parsing, name validation, and expansion.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Configuration errors. All of these abort an operation before any
/// record is written.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid instance name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid name pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("rule #{index}: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("duplicate instance name {name:?} (rules #{first} and #{second})")]
    DuplicateName {
        name: String,
        first: usize,
        second: usize,
    },

    #[error("rule #{index}: port for {name:?} would exceed 65535")]
    PortOverflow { index: usize, name: String },

    #[error("invalid resource limit {field}={value:?}: {reason}")]
    InvalidResource {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read fleet spec {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fleet spec {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("failed to serialize fleet spec: {0}")]
    Serialize(String),
}
