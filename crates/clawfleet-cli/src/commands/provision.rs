use std::path::Path;

use anyhow::{Context as _, bail};
use clawfleet_core::{FleetSpec, InstanceDefinition, expand};
use clawfleet_scheduler::{PlanAction, ProvisionPlan};

use super::Context;

pub fn generate(ctx: &Context, config: Option<&Path>, dry_run: bool) -> anyhow::Result<()> {
    let path = config.map(Path::to_path_buf).unwrap_or_else(|| ctx.fleet_file());
    if !path.exists() {
        bail!(
            "fleet specification {} not found (run `clawfleet init` to create one)",
            path.display()
        );
    }
    let spec = FleetSpec::from_file(&path)?;
    let definitions = expand(&spec, &ctx.defaults())?;
    println!("{} instance(s) defined in {}", definitions.len(), path.display());
    provision(ctx, &definitions, dry_run)
}

pub fn create_range(
    ctx: &Context,
    prefix: &str,
    start: u32,
    end: u32,
    gateway_start: Option<u16>,
    bridge_start: Option<u16>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let spec = FleetSpec::range(prefix, start, end, gateway_start, bridge_start)?;
    let definitions = expand(&spec, &ctx.defaults())?;
    provision(ctx, &definitions, dry_run)
}

fn provision(ctx: &Context, definitions: &[InstanceDefinition], dry_run: bool) -> anyhow::Result<()> {
    let provisioner = ctx.provisioner(ctx.runtime()?)?;

    if dry_run {
        let plan = provisioner.plan(definitions)?;
        print_plan(&plan, true);
        println!(
            "Dry run: {} to create, {} existing. Nothing written.",
            plan.created().count(),
            plan.existing().count()
        );
        return Ok(());
    }

    let plan = provisioner
        .provision(definitions)
        .context("provisioning failed")?;
    print_plan(&plan, false);
    println!(
        "✓ {} created, {} already existed",
        plan.created().count(),
        plan.existing().count()
    );
    Ok(())
}

fn print_plan(plan: &ProvisionPlan, dry_run: bool) {
    for entry in &plan.entries {
        let record = entry.record();
        let verb = match (&entry.action, dry_run) {
            (PlanAction::Create(_), true) => "create",
            (PlanAction::Create(_), false) => "created",
            (PlanAction::Exists(_), _) => "exists",
        };
        println!(
            "  {verb:<8} {:<24} gateway {:>5}  bridge {:>5}",
            record.name, record.gateway_port, record.bridge_port
        );
    }
}
