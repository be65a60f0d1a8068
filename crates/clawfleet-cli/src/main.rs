//! clawfleet — provision and operate a fleet of isolated gateway instances.
//!
//! # Usage
//!
//! ```text
//! clawfleet init
//! clawfleet generate --dry-run
//! clawfleet generate
//! clawfleet up --parallel 8 --filter 'user-*'
//! clawfleet status --json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

mod commands;

use commands::Context;

#[derive(Parser)]
#[command(
    name = "clawfleet",
    about = "clawfleet — run many isolated clawdbot gateways on one host",
    version,
    propagate_version = true
)]
struct Cli {
    /// State directory (records, fleet spec, default instance dirs).
    /// Defaults to $HOME/.clawfleet.
    #[arg(long, global = true, env = "CLAWFLEET_HOME")]
    home: Option<PathBuf>,

    /// Container image for new instances.
    #[arg(long, global = true, env = "CLAWFLEET_IMAGE", default_value = clawfleet_core::DEFAULT_IMAGE)]
    image: String,

    /// Docker binary used to drive compose.
    #[arg(long, global = true, env = "CLAWFLEET_DOCKER", default_value = "docker")]
    compose_bin: String,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter fleet specification to <home>/fleet.toml
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Check docker and build the image if it is missing
    Setup {
        /// Build context for the image.
        #[arg(long, default_value = ".")]
        context: PathBuf,
        /// Build even if the image already exists.
        #[arg(long)]
        rebuild: bool,
    },
    /// Create one instance record
    Create {
        name: String,
        #[arg(long)]
        gateway_port: Option<u16>,
        #[arg(long)]
        bridge_port: Option<u16>,
        #[command(flatten)]
        resources: ResourceArgs,
    },
    /// Expand a fleet specification and create the missing records
    Generate {
        /// Fleet specification (TOML, or YAML/JSON by extension).
        /// Defaults to <home>/fleet.toml.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the plan without writing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Create <prefix>-<start> through <prefix>-<end>
    CreateRange {
        prefix: String,
        start: u32,
        end: u32,
        #[arg(long)]
        gateway_start: Option<u16>,
        #[arg(long)]
        bridge_start: Option<u16>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Start every matching instance
    Up(BulkArgs),
    /// Stop every matching instance
    Down(BulkArgs),
    /// Show whether each instance is running
    Status {
        #[arg(short, long)]
        filter: Option<String>,
        #[arg(long)]
        json: bool,
        #[arg(short, long, default_value_t = 4)]
        parallel: usize,
    },
    /// Write one compose file describing every instance
    Export {
        /// Output path, or `-` for stdout. Defaults to <home>/compose.yml.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Start one instance
    Start { name: String },
    /// Stop one instance
    Stop { name: String },
    /// Delete instance records
    Remove {
        #[arg(required = true)]
        names: Vec<String>,
        /// Also delete the config and workspace directories.
        #[arg(long)]
        purge: bool,
        /// Stop the instance's containers first.
        #[arg(long)]
        stop: bool,
    },
    /// List instance records
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show an instance's container logs
    Logs {
        name: String,
        #[arg(short, long)]
        follow: bool,
        #[arg(long)]
        tail: Option<u32>,
    },
    /// Show claimed ports and the next free pair
    Ports,
}

#[derive(Args)]
struct BulkArgs {
    /// Maximum number of instances acted on at once.
    #[arg(short, long, default_value_t = 4)]
    parallel: usize,
    /// Glob over instance names (`*`, `?`, `[a-z]`).
    #[arg(short, long)]
    filter: Option<String>,
    /// List the instances that would be acted on.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct ResourceArgs {
    /// Memory limit, e.g. 2g.
    #[arg(long)]
    memory: Option<String>,
    #[arg(long)]
    memory_swap: Option<String>,
    /// CPU quota, e.g. 1.5.
    #[arg(long)]
    cpus: Option<String>,
    #[arg(long)]
    pids_limit: Option<u32>,
}

impl From<ResourceArgs> for clawfleet_core::ResourceLimits {
    fn from(args: ResourceArgs) -> Self {
        Self {
            memory: args.memory,
            memory_swap: args.memory_swap,
            cpus: args.cpus,
            pids_limit: args.pids_limit,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Usage errors exit 1; --help and --version exit 0.
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if let Err(e) = init_tracing(cli.verbose, cli.log_json) {
        eprintln!("error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool, json: bool) -> anyhow::Result<()> {
    let level = if verbose { "clawfleet=debug" } else { "clawfleet=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::new(cli.home, cli.image, cli.compose_bin)?;

    match cli.command {
        Commands::Init { force } => commands::setup::init(&ctx, force),
        Commands::Setup { context, rebuild } => commands::setup::setup(&ctx, &context, rebuild),
        Commands::Create {
            name,
            gateway_port,
            bridge_port,
            resources,
        } => commands::instance::create(&ctx, name, gateway_port, bridge_port, resources.into()),
        Commands::Generate { config, dry_run } => {
            commands::provision::generate(&ctx, config.as_deref(), dry_run)
        }
        Commands::CreateRange {
            prefix,
            start,
            end,
            gateway_start,
            bridge_start,
            dry_run,
        } => commands::provision::create_range(
            &ctx,
            &prefix,
            start,
            end,
            gateway_start,
            bridge_start,
            dry_run,
        ),
        Commands::Up(args) => {
            commands::lifecycle::up(&ctx, args.parallel, args.filter.as_deref(), args.dry_run).await
        }
        Commands::Down(args) => {
            commands::lifecycle::down(&ctx, args.parallel, args.filter.as_deref(), args.dry_run).await
        }
        Commands::Status {
            filter,
            json,
            parallel,
        } => commands::lifecycle::status(&ctx, parallel, filter.as_deref(), json).await,
        Commands::Export { output, filter } => {
            commands::setup::export(&ctx, output.as_deref(), filter.as_deref())
        }
        Commands::Start { name } => commands::lifecycle::start(&ctx, &name),
        Commands::Stop { name } => commands::lifecycle::stop(&ctx, &name),
        Commands::Remove { names, purge, stop } => commands::instance::remove(&ctx, &names, purge, stop),
        Commands::List { json } => commands::instance::list(&ctx, json),
        Commands::Logs { name, follow, tail } => commands::instance::logs(&ctx, &name, follow, tail),
        Commands::Ports => commands::instance::ports(&ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_bulk_flags() {
        let cli = Cli::try_parse_from(["clawfleet", "up", "--parallel", "8", "--filter", "user-*"]).unwrap();
        match cli.command {
            Commands::Up(args) => {
                assert_eq!(args.parallel, 8);
                assert_eq!(args.filter.as_deref(), Some("user-*"));
                assert!(!args.dry_run);
            }
            _ => panic!("expected up"),
        }
    }

    #[test]
    fn global_options_work_after_subcommand() {
        let cli = Cli::try_parse_from(["clawfleet", "list", "--home", "/tmp/fleet", "--image", "img:1"]).unwrap();
        assert_eq!(cli.home, Some(PathBuf::from("/tmp/fleet")));
        assert_eq!(cli.image, "img:1");
    }

    #[test]
    fn usage_errors_are_reported_on_stderr() {
        let err = Cli::try_parse_from(["clawfleet", "create-range", "bot", "x", "5"]).err().unwrap();
        assert!(err.use_stderr());
        let help = Cli::try_parse_from(["clawfleet", "--help"]).err().unwrap();
        assert!(!help.use_stderr());
    }
}
