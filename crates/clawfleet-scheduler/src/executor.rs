//! Bounded parallel executor.
//!
//! Runs one blocking action per instance record on tokio's blocking pool
//! with at most `limit` actions in flight. Admission is FIFO: once the
//! ceiling is reached, the oldest outstanding action is awaited before
//! the next record starts. Every record is attempted; a failure is
//! recorded against its instance and never cancels the others.
//!
//! ```text
//! records ─▶ [ slot 1 ] [ slot 2 ] ... [ slot N ] ─▶ BatchReport
//!                 │          │              │
//!                 └──────────┴── TaskOutput ┴──▶ LineSink("[name] line")
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use clawfleet_core::InstanceRecord;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Receives each output line together with the instance that produced it.
pub type LineSink = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Output handle passed to a running action.
pub struct TaskOutput {
    instance: String,
    sink: Option<LineSink>,
}

impl TaskOutput {
    /// Output for an action run directly rather than through the executor.
    pub fn labelled(instance: &str, sink: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        Self {
            instance: instance.to_string(),
            sink: Some(Arc::new(sink)),
        }
    }

    pub fn line(&self, line: &str) {
        debug!(instance = %self.instance, "{line}");
        if let Some(sink) = &self.sink {
            sink(&self.instance, line);
        }
    }

    pub fn lines<'a>(&self, lines: impl IntoIterator<Item = &'a String>) {
        for line in lines {
            self.line(line);
        }
    }
}

/// Result of one action against one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceOutcome<T> {
    pub name: String,
    pub result: Result<T, String>,
}

impl<T> InstanceOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-instance outcomes of a batch, in admission order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport<T> {
    pub outcomes: Vec<InstanceOutcome<T>>,
}

impl<T> BatchReport<T> {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(_) => None,
            Err(e) => Some((o.name.as_str(), e.as_str())),
        })
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Runs per-instance actions with a concurrency ceiling.
#[derive(Clone)]
pub struct BoundedExecutor {
    limit: usize,
    sink: Option<LineSink>,
}

impl fmt::Debug for BoundedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedExecutor")
            .field("limit", &self.limit)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl BoundedExecutor {
    /// `limit` must be at least 1.
    pub fn new(limit: usize) -> SchedulerResult<Self> {
        if limit == 0 {
            return Err(SchedulerError::InvalidConcurrency);
        }
        Ok(Self { limit, sink: None })
    }

    pub fn with_sink(mut self, sink: LineSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Apply `action` to every record and collect the outcomes.
    pub async fn run_all<T, E, F>(&self, records: Vec<InstanceRecord>, action: F) -> BatchReport<T>
    where
        T: Send + 'static,
        E: fmt::Display,
        F: Fn(&InstanceRecord, &TaskOutput) -> Result<T, E> + Send + Sync + 'static,
    {
        let action = Arc::new(action);
        let mut in_flight: VecDeque<(String, JoinHandle<Result<T, String>>)> = VecDeque::new();
        let mut outcomes = Vec::with_capacity(records.len());
        debug!(records = records.len(), limit = self.limit, "batch started");

        for record in records {
            if in_flight.len() >= self.limit {
                if let Some((name, handle)) = in_flight.pop_front() {
                    outcomes.push(settle(name, handle.await));
                }
            }
            let action = Arc::clone(&action);
            let output = TaskOutput {
                instance: record.name.clone(),
                sink: self.sink.clone(),
            };
            let name = record.name.clone();
            let handle = tokio::task::spawn_blocking(move || {
                action(&record, &output).map_err(|e| e.to_string())
            });
            in_flight.push_back((name, handle));
        }
        while let Some((name, handle)) = in_flight.pop_front() {
            outcomes.push(settle(name, handle.await));
        }

        let report = BatchReport { outcomes };
        debug!(
            attempted = report.attempted(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch finished"
        );
        report
    }
}

fn settle<T>(
    name: String,
    joined: Result<Result<T, String>, tokio::task::JoinError>,
) -> InstanceOutcome<T> {
    let result = match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(instance = %name, error = %e, "action failed");
            Err(e)
        }
        Err(join) => {
            warn!(instance = %name, error = %join, "action panicked");
            Err(format!("action panicked: {join}"))
        }
    };
    InstanceOutcome { name, result }
}
