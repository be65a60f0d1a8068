//! Start, stop, and inspect instances, one at a time or in bulk.

use anyhow::bail;
use clawfleet_core::InstanceRecord;
use clawfleet_scheduler::operations::{self, start_all, status_all, stop_all};
use clawfleet_scheduler::{BatchReport, TaskOutput};
use serde::Serialize;

use super::Context;

pub async fn up(ctx: &Context, parallel: usize, filter: Option<&str>, dry_run: bool) -> anyhow::Result<()> {
    let records = ctx.store()?.filter(filter)?;
    if records.is_empty() {
        bail!("no instances matched{}", filter_label(filter));
    }
    if dry_run {
        print_targets("start", &records);
        return Ok(());
    }

    let executor = ctx.executor(parallel)?;
    let report = start_all(&executor, ctx.runtime()?, records).await;
    finish(&report, "started")
}

pub async fn down(ctx: &Context, parallel: usize, filter: Option<&str>, dry_run: bool) -> anyhow::Result<()> {
    let records = ctx.store()?.filter(filter)?;
    if records.is_empty() {
        println!("No instances matched{}; nothing to stop.", filter_label(filter));
        return Ok(());
    }
    if dry_run {
        print_targets("stop", &records);
        return Ok(());
    }

    let executor = ctx.executor(parallel)?;
    let report = stop_all(&executor, ctx.runtime()?, records).await;
    finish(&report, "stopped")
}

pub async fn status(ctx: &Context, parallel: usize, filter: Option<&str>, json: bool) -> anyhow::Result<()> {
    let records = ctx.store()?.filter(filter)?;
    let executor = clawfleet_scheduler::BoundedExecutor::new(parallel)?;
    let report = status_all(&executor, ctx.runtime()?, records.clone()).await;
    let rows = status_rows(&records, &report);

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("{:<24} {:>7} {:>7}  STATE", "NAME", "GATEWAY", "BRIDGE");
        for row in &rows {
            let state = match (row.running, &row.error) {
                (_, Some(error)) => format!("unknown ({error})"),
                (Some(true), None) => "running".to_string(),
                _ => "stopped".to_string(),
            };
            println!(
                "{:<24} {:>7} {:>7}  {state}",
                row.name, row.gateway_port, row.bridge_port
            );
        }
        let running = rows.iter().filter(|r| r.running == Some(true)).count();
        println!("\n{} instance(s), {running} running", rows.len());
    }

    if report.failed() > 0 {
        bail!("could not query {} instance(s)", report.failed());
    }
    Ok(())
}

pub fn start(ctx: &Context, name: &str) -> anyhow::Result<()> {
    let record = ctx.store()?.load(name)?;
    let runtime = ctx.runtime()?;
    operations::start_one(runtime.as_ref(), &record, &single_output(name))?;
    println!("✓ Started {name} (gateway {}, bridge {})", record.gateway_port, record.bridge_port);
    Ok(())
}

pub fn stop(ctx: &Context, name: &str) -> anyhow::Result<()> {
    let record = ctx.store()?.load(name)?;
    let runtime = ctx.runtime()?;
    operations::stop_one(runtime.as_ref(), &record, &single_output(name))?;
    println!("✓ Stopped {name}");
    Ok(())
}

// ── Output ────────────────────────────────────────────────────────

/// One line of `status --json`.
#[derive(Debug, PartialEq, Serialize)]
pub struct StatusRow {
    pub name: String,
    pub gateway_port: u16,
    pub bridge_port: u16,
    pub running: Option<bool>,
    pub error: Option<String>,
}

fn status_rows(records: &[InstanceRecord], report: &BatchReport<bool>) -> Vec<StatusRow> {
    records
        .iter()
        .zip(&report.outcomes)
        .map(|(record, outcome)| StatusRow {
            name: record.name.clone(),
            gateway_port: record.gateway_port,
            bridge_port: record.bridge_port,
            running: outcome.result.as_ref().ok().copied(),
            error: outcome.result.as_ref().err().cloned(),
        })
        .collect()
}

fn single_output(name: &str) -> TaskOutput {
    TaskOutput::labelled(name, |name: &str, line: &str| println!("[{name}] {line}"))
}

fn print_targets(verb: &str, records: &[InstanceRecord]) {
    for record in records {
        println!("  would {verb} {}", record.name);
    }
    println!("Dry run: {} instance(s).", records.len());
}

fn finish(report: &BatchReport<()>, verb: &str) -> anyhow::Result<()> {
    for (name, error) in report.failures() {
        eprintln!("✗ {name}: {error}");
    }
    println!(
        "{} {} {verb}, {} failed ({} attempted)",
        if report.is_success() { "✓" } else { "✗" },
        report.succeeded(),
        report.failed(),
        report.attempted()
    );
    if !report.is_success() {
        bail!("{} instance(s) failed", report.failed());
    }
    Ok(())
}

fn filter_label(filter: Option<&str>) -> String {
    filter.map(|f| format!(" filter {f:?}")).unwrap_or_default()
}
