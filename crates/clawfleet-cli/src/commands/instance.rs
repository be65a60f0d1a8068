//! Single-record commands.

use anyhow::bail;
use clawfleet_core::{InstanceRecord, ResourceLimits};
use clawfleet_runtime::LaunchSpec;
use clawfleet_scheduler::CreateRequest;
use clawfleet_state::StateError;
use tracing::warn;

use super::Context;

pub fn create(
    ctx: &Context,
    name: String,
    gateway_port: Option<u16>,
    bridge_port: Option<u16>,
    resources: ResourceLimits,
) -> anyhow::Result<()> {
    let defaults = ctx.defaults();
    let provisioner = ctx.provisioner(ctx.runtime()?)?;
    let request = CreateRequest {
        name,
        gateway_port,
        bridge_port,
        image: None,
        resources,
    };
    let record = provisioner.create(request, &defaults)?;

    println!("✓ Created {}", record.name);
    println!("  gateway port   {}", record.gateway_port);
    println!("  bridge port    {}", record.bridge_port);
    println!("  config dir     {}", record.config_dir.display());
    println!("  workspace dir  {}", record.workspace_dir.display());
    println!("  image          {}", record.image);
    println!("Start it with `clawfleet start {}`.", record.name);
    Ok(())
}

/// Delete each named record. Unknown names are a no-op; a failure on one
/// name does not stop the others. Containers are left running unless
/// `stop` is set, and a failed stop never keeps the record.
pub fn remove(ctx: &Context, names: &[String], purge: bool, stop: bool) -> anyhow::Result<()> {
    let store = ctx.store()?;
    let runtime = if stop {
        match ctx.runtime() {
            Ok(runtime) => Some(runtime),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "runtime unavailable, records will be removed without stopping");
                None
            }
        }
    } else {
        None
    };
    let mut failed = 0;

    for name in names {
        let result = store.load(name).and_then(|record| {
            if let Some(runtime) = &runtime {
                if let Err(e) = runtime.down(&LaunchSpec::from(&record)) {
                    warn!(instance = %name, error = %e, "could not stop instance");
                }
            }
            store.delete(name)?;
            if purge {
                purge_dirs(&record);
            }
            Ok(())
        });
        match result {
            Ok(()) => println!("✓ Removed {name}"),
            Err(StateError::NotFound(_)) => println!("· {name}: no such instance, nothing to remove"),
            // An unreadable record can still be deleted, but its directories are unknown.
            Err(StateError::Corrupt { reason, .. }) => match store.delete(name) {
                Ok(_) => println!("✓ Removed {name} (record was corrupt: {reason})"),
                Err(e) => {
                    eprintln!("✗ {name}: {e}");
                    failed += 1;
                }
            },
            Err(e) => {
                eprintln!("✗ {name}: {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} removal(s) failed", names.len());
    }
    Ok(())
}

fn purge_dirs(record: &InstanceRecord) {
    for dir in [&record.config_dir, &record.workspace_dir] {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(instance = %record.name, dir = %dir.display(), error = %e, "could not delete directory");
            }
        }
    }
}

pub fn list(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let records = ctx.store()?.list()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No instances. Create one with `clawfleet create <name>`.");
        return Ok(());
    }
    print!("{}", format_table(&records));
    Ok(())
}

pub fn logs(ctx: &Context, name: &str, follow: bool, tail: Option<u32>) -> anyhow::Result<()> {
    // Fail on an unknown name before touching docker.
    ctx.store()?.load(name)?;
    ctx.runtime()?.logs(name, follow, tail)?;
    Ok(())
}

pub fn ports(ctx: &Context) -> anyhow::Result<()> {
    let mut records = ctx.store()?.list()?;
    records.sort_by_key(|r| r.gateway_port);
    if !records.is_empty() {
        println!("{:>7} {:>7}  INSTANCE", "GATEWAY", "BRIDGE");
        for r in &records {
            println!("{:>7} {:>7}  {}", r.gateway_port, r.bridge_port, r.name);
        }
        println!();
    }

    let defaults = ctx.defaults();
    let allocator = ctx.provisioner(ctx.runtime()?)?.allocator()?;
    let (gateway, bridge) = allocator.find_available_pair(defaults.gateway_port_start)?;
    println!("Next free pair: gateway {gateway}, bridge {bridge}");
    Ok(())
}

fn format_table(records: &[InstanceRecord]) -> String {
    let width = records
        .iter()
        .map(|r| r.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    let mut out = format!("{:<width$}  {:>7} {:>7}  IMAGE\n", "NAME", "GATEWAY", "BRIDGE");
    for r in records {
        out.push_str(&format!(
            "{:<width$}  {:>7} {:>7}  {}\n",
            r.name, r.gateway_port, r.bridge_port, r.image
        ));
    }
    out
}
