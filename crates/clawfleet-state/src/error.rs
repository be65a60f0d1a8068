//! Error types for the record store.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for record store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during record store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("instance already exists: {0}")]
    AlreadyExists(String),

    #[error("instance {name:?} conflicts with existing instance {existing:?} (names differ only in case)")]
    NameConflict { name: String, existing: String },

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("corrupt record {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("invalid filter pattern {pattern:?}: {reason}")]
    InvalidFilter { pattern: String, reason: String },

    #[error("failed to acquire creation lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Invalid(#[from] clawfleet_core::CoreError),
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StateError {
        let path = path.into();
        move |source| StateError::Io { path, source }
    }
}
