//! Runtime adapter error types.
//!
//! Callers only distinguish success from failure; the detail here is for
//! the operator reading the log.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("required tool not available: {0}")]
    MissingDependency(String),

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}", exit_label(*code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        /// Combined stdout/stderr lines of the failed command.
        output: Vec<String>,
    },

    #[error("failed to render compose document: {0}")]
    Render(String),
}

impl RuntimeError {
    /// Output captured from the failing command, if any.
    pub fn output(&self) -> &[String] {
        match self {
            RuntimeError::CommandFailed { output, .. } => output,
            _ => &[],
        }
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}
