use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use stevedore_core::{ExecPlan, ExecutionLedger, ProbeConfig};
use stevedore_runner::{ExecSession, HostRuntime};
use tracing::debug;

mod logging;

use logging::LogLevel;

const DEFAULT_PLAN: &str = "Stevedore.toml";

#[derive(Parser)]
#[command(name = "stevedore")]
#[command(about = "Run command sequences inside a container and poll them to completion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (overrides RUST_LOG)
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every command of a plan, stopping at the first failure
    Run(RunArgs),

    /// Validate a plan and print what would run
    Check {
        /// Path to the plan file
        #[arg(short, long, default_value = DEFAULT_PLAN)]
        plan: PathBuf,

        /// Print the validated plan as normalized TOML
        #[arg(long)]
        toml: bool,
    },

    /// Write a plan template
    Init {
        /// Where to write the template
        #[arg(short, long, default_value = DEFAULT_PLAN)]
        plan: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to the plan file
    #[arg(short, long, default_value = DEFAULT_PLAN)]
    plan: PathBuf,

    /// Override the plan's target container
    #[arg(short, long)]
    container: Option<String>,

    /// Override the total poll timeout per command (milliseconds)
    #[arg(long)]
    poll_timeout_ms: Option<u64>,

    /// Override the delay between inspections (milliseconds)
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Print the ledger as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level);

    match cli.command {
        Commands::Run(args) => run_plan(args).await?,
        Commands::Check { plan, toml } => check_plan(&plan, toml)?,
        Commands::Init { plan } => write_template(&plan)?,
    }

    Ok(())
}

async fn run_plan(args: RunArgs) -> anyhow::Result<()> {
    let mut plan = load_plan(&args.plan)?;

    if let Some(container) = args.container {
        plan.container = container;
    }
    if args.poll_timeout_ms.is_some() || args.poll_interval_ms.is_some() {
        let base = plan.probe_or_default();
        let probe = ProbeConfig::from_millis(
            args.poll_timeout_ms
                .unwrap_or(base.poll_timeout().as_millis() as u64),
            args.poll_interval_ms
                .unwrap_or(base.poll_interval().as_millis() as u64),
        )?;
        plan.probe = Some(probe);
    }
    plan.validate()?;

    debug!(container = %plan.container, commands = plan.execs.len(), "plan loaded");

    let session = ExecSession::from_plan(HostRuntime::new(), &plan);
    match session.run(&plan.execs).await {
        Ok(ledger) => {
            print_ledger(&ledger, args.json)?;
            Ok(())
        }
        Err(err) => {
            if !err.completed.is_empty() {
                eprintln!("Completed before failure:");
                print_ledger(&err.completed, args.json)?;
            }
            // Returned rather than exiting so the runtime drops its children.
            Err(err).context("Session failed")
        }
    }
}

fn load_plan(path: &Path) -> anyhow::Result<ExecPlan> {
    ExecPlan::load(path).with_context(|| format!("Failed to load plan at {}", path.display()))
}

fn check_plan(path: &Path, as_toml: bool) -> anyhow::Result<()> {
    let plan = load_plan(path)?;
    if as_toml {
        print!("{}", plan.to_toml_string()?);
        return Ok(());
    }

    let probe = plan.probe_or_default();

    println!("Plan: {}", path.display());
    println!("Container: {}", plan.container);
    println!(
        "Probe: timeout {}ms, interval {}ms",
        probe.poll_timeout().as_millis(),
        probe.poll_interval().as_millis()
    );
    match &plan.success_on_exit_codes {
        Some(codes) if !codes.is_empty() => println!("Allowed exit codes: {:?}", codes),
        _ => println!("Allowed exit codes: any"),
    }

    println!("\nCommands:");
    for (idx, spec) in plan.execs.iter().enumerate() {
        println!("  {}. {}", idx + 1, spec.display_command());
        if let Some(user) = &spec.user {
            println!("     user: {}", user);
        }
        if let Some(dir) = &spec.working_dir {
            println!("     working_dir: {}", dir);
        }
        if !spec.attach_stdout || !spec.attach_stderr {
            println!(
                "     attach: stdout={} stderr={}",
                spec.attach_stdout, spec.attach_stderr
            );
        }
    }
    Ok(())
}

fn print_ledger(ledger: &ExecutionLedger, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(ledger)?);
        return Ok(());
    }

    println!("Ledger ({} exec(s)):", ledger.len());
    for (idx, entry) in ledger.iter().enumerate() {
        let exit = entry
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let duration = entry.completed_at.signed_duration_since(entry.started_at);
        println!(
            "  {}. {} exit={} polls={} {}ms  {}",
            idx + 1,
            entry.handle,
            exit,
            entry.polls,
            duration.num_milliseconds(),
            entry.command
        );
    }
    Ok(())
}

fn write_template(path: &Path) -> anyhow::Result<()> {
    let template = r#"# Stevedore plan: commands run one after another inside `container`.

container = "my-container"

# Exit codes accepted for every command; omit to accept any.
success_on_exit_codes = [0]

[probe]
poll_timeout_ms = 60000
poll_interval_ms = 2000

[[exec]]
cmd = ["sh", "-c", "echo hello"]

[[exec]]
cmd = ["ls", "-la"]
working_dir = "/"
# user = "1000:1000"
# attach_stdout = true
# attach_stderr = true
"#;

    if path.exists() {
        anyhow::bail!(
            "a plan already exists at {}; use a different path or remove the existing file",
            path.display()
        );
    }

    fs::write(path, template)?;
    println!("Created plan template at {}", path.display());
    Ok(())
}
