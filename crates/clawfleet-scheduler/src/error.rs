//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur while allocating, provisioning, or scheduling.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no free port in {first}..={last}")]
    PortsExhausted { first: u16, last: u16 },

    #[error("port {port} requested for {instance:?} is already in use")]
    PortConflict { port: u16, instance: String },

    #[error("concurrency limit must be at least 1")]
    InvalidConcurrency,

    #[error(transparent)]
    State(#[from] clawfleet_state::StateError),

    #[error(transparent)]
    Config(#[from] clawfleet_core::CoreError),

    #[error(transparent)]
    Runtime(#[from] clawfleet_runtime::RuntimeError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
