use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, bail};
use clawfleet_core::FleetConfig;
use clawfleet_runtime::{LaunchSpec, compose};

use super::Context;

/// Compose project name used for the exported fleet document.
const EXPORT_PROJECT: &str = "clawfleet";

pub fn init(ctx: &Context, force: bool) -> anyhow::Result<()> {
    let path = ctx.fleet_file();
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::create_dir_all(&ctx.home)
        .with_context(|| format!("creating {}", ctx.home.display()))?;
    let scaffold = FleetConfig::scaffold(&ctx.image).to_toml_string()?;
    std::fs::write(&path, scaffold).with_context(|| format!("writing {}", path.display()))?;
    println!("✓ Generated {}", path.display());
    println!("Edit it, then run `clawfleet generate --dry-run`.");
    Ok(())
}

pub fn setup(ctx: &Context, context: &Path, rebuild: bool) -> anyhow::Result<()> {
    let runtime = ctx.runtime()?;
    println!("✓ docker and docker compose are available");

    if !rebuild && runtime.image_exists(&ctx.image)? {
        println!("✓ Image {} present", ctx.image);
        return Ok(());
    }
    if !context.is_dir() {
        bail!("build context {} is not a directory", context.display());
    }
    println!("Building {} from {} ...", ctx.image, context.display());
    let output = runtime.build(&ctx.image, context).map_err(|e| {
        for line in e.output() {
            eprintln!("{line}");
        }
        e
    })?;
    for line in output.lines.iter().rev().take(5).rev() {
        println!("  {line}");
    }
    println!("✓ Built {}", ctx.image);
    Ok(())
}

/// Render every (matching) record into one compose document.
pub fn export(ctx: &Context, output: Option<&Path>, filter: Option<&str>) -> anyhow::Result<()> {
    let records = ctx.store()?.filter(filter)?;
    let launches: Vec<LaunchSpec> = records.iter().map(LaunchSpec::from).collect();
    let document = compose::render_fleet(EXPORT_PROJECT, &launches)?;

    let path = output.map(Path::to_path_buf).unwrap_or_else(|| ctx.export_file());
    if path.as_os_str() == "-" {
        print!("{document}");
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    write_private(&path, document.as_bytes())?;
    println!("✓ Exported {} instance(s) to {}", launches.len(), path.display());
    Ok(())
}

/// The export carries gateway tokens, so it is readable by the owner only.
fn write_private(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("writing {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
