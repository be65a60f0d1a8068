//! Fleet operations: runtime actions fanned out through the executor.

use std::sync::Arc;

use clawfleet_core::InstanceRecord;
use clawfleet_runtime::{LaunchSpec, RuntimeAdapter, RuntimeError, RuntimeResult};
use tracing::info;

use crate::executor::{BatchReport, BoundedExecutor, TaskOutput};

/// Bring one instance up, forwarding the runtime's output.
pub fn start_one(runtime: &dyn RuntimeAdapter, record: &InstanceRecord, out: &TaskOutput) -> RuntimeResult<()> {
    let launch = LaunchSpec::from(record);
    forward(runtime.up(&launch), out)
}

/// Bring one instance down, forwarding the runtime's output.
pub fn stop_one(runtime: &dyn RuntimeAdapter, record: &InstanceRecord, out: &TaskOutput) -> RuntimeResult<()> {
    let launch = LaunchSpec::from(record);
    forward(runtime.down(&launch), out)
}

fn forward(result: RuntimeResult<clawfleet_runtime::ActionOutput>, out: &TaskOutput) -> RuntimeResult<()> {
    match result {
        Ok(output) => {
            out.lines(&output.lines);
            Ok(())
        }
        Err(e) => {
            out.lines(e.output());
            Err(e)
        }
    }
}

pub async fn start_all(
    executor: &BoundedExecutor,
    runtime: Arc<dyn RuntimeAdapter>,
    records: Vec<InstanceRecord>,
) -> BatchReport<()> {
    info!(instances = records.len(), limit = executor.limit(), "starting instances");
    executor
        .run_all(records, move |record, out| start_one(runtime.as_ref(), record, out))
        .await
}

pub async fn stop_all(
    executor: &BoundedExecutor,
    runtime: Arc<dyn RuntimeAdapter>,
    records: Vec<InstanceRecord>,
) -> BatchReport<()> {
    info!(instances = records.len(), limit = executor.limit(), "stopping instances");
    executor
        .run_all(records, move |record, out| stop_one(runtime.as_ref(), record, out))
        .await
}

/// Liveness of every record. A runtime query error is a per-instance
/// failure, not a stopped instance.
pub async fn status_all(
    executor: &BoundedExecutor,
    runtime: Arc<dyn RuntimeAdapter>,
    records: Vec<InstanceRecord>,
) -> BatchReport<bool> {
    executor
        .run_all(records, move |record, _| -> Result<bool, RuntimeError> {
            runtime.is_running(&record.name)
        })
        .await
}
