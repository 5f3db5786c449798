//! CLI entry point for rust_flow.
//!
//! ```bash
//! rust_flow validate demos/uv_monitor.toml
//! rust_flow compile demos/uv_monitor.toml --json
//! rust_flow run demos/uv_monitor.toml --config config/rust_flow.toml
//! ```
//!
//! `run` executes against simulated drivers. By default it uses the
//! simulated clock and finishes immediately; `--realtime` waits out every
//! offset on the wall clock. Ctrl-C cancels a realtime run and puts every
//! device into its safe state.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_flow::config::{Settings, DEFAULT_CONFIG_PATH};
use rust_flow::document::ExperimentDocument;
use rust_flow::executor::{Clock, Executor, ExecutorOptions, SimulatedClock, SystemClock};
use rust_flow::hardware::DriverRegistry;
use rust_flow::naming::NameAllocator;
use rust_flow::protocol::{ExecutionSchedule, Protocol, ProtocolCompiler};
use rust_flow::telemetry;
use rust_flow::validation::validate_apparatus;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rust_flow")]
#[command(about = "Flow-chemistry procedure compiler and executor", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check an experiment file without compiling it
    Validate {
        /// Path to the experiment TOML file
        experiment: PathBuf,
    },

    /// Compile an experiment and print its schedule
    Compile {
        experiment: PathBuf,

        /// Print the schedule as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compile and execute against simulated drivers
    Run {
        experiment: PathBuf,

        /// Wait out offsets on the wall clock instead of simulating time
        #[arg(long)]
        realtime: bool,

        /// Also write the JSON report to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let settings = Settings::load_from(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;
    telemetry::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Validate { experiment } => validate(&experiment),
        Commands::Compile { experiment, json } => {
            let schedule = compile(&load(&experiment)?, &settings)?;
            if json {
                println!("{}", schedule.to_json()?);
            } else {
                print_schedule(&schedule);
            }
            Ok(())
        }
        Commands::Run {
            experiment,
            realtime,
            output,
        } => run(&experiment, &settings, realtime, output).await,
    }
}

fn load(path: &Path) -> Result<Protocol> {
    let document = ExperimentDocument::load(path)
        .with_context(|| format!("Failed to read experiment {}", path.display()))?;
    let apparatus = Arc::new(document.apparatus(&mut NameAllocator::for_apparatus()));
    validate_apparatus(&apparatus).context("Invalid apparatus")?;
    let protocol = document
        .protocol(apparatus, &mut NameAllocator::for_protocols())
        .context("Invalid protocol")?;
    Ok(protocol)
}

fn validate(path: &Path) -> Result<()> {
    let protocol = load(path)?;
    let apparatus = protocol.apparatus();
    for connection in apparatus.connections() {
        info!(
            from = %connection.from,
            to = %connection.to,
            volume_ul = connection.tube.volume_ul(),
            "Tube"
        );
    }
    println!(
        "{}: apparatus '{}' ({} components, {} tubes), protocol '{}' ({} entries) OK",
        path.display(),
        apparatus.name,
        apparatus.components().len(),
        apparatus.connections().len(),
        protocol.name,
        protocol.len()
    );
    Ok(())
}

fn compile(protocol: &Protocol, settings: &Settings) -> Result<ExecutionSchedule> {
    let compiler = ProtocolCompiler::new(settings.compiler.clone());
    compiler
        .compile(protocol)
        .with_context(|| format!("Failed to compile protocol '{}'", protocol.name))
}

fn print_schedule(schedule: &ExecutionSchedule) {
    println!(
        "Protocol '{}': {} events over {:?}",
        schedule.protocol,
        schedule.len(),
        schedule.span()
    );
    for event in schedule.events() {
        let assignment: Vec<String> = event
            .parameters
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        println!(
            "  {:>10.3}s  {:<16} {:<17} {:<10} {}",
            event.offset.as_secs_f64(),
            event.component,
            format!("{:?}", event.kind),
            event.origin.to_string(),
            assignment.join(", ")
        );
    }
}

async fn run(
    path: &Path,
    settings: &Settings,
    realtime: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let protocol = load(path)?;
    let schedule = compile(&protocol, settings)?;
    let drivers = DriverRegistry::simulated(protocol.apparatus());

    let executor = Executor::new(ExecutorOptions::from(&settings.executor));
    let stop = executor.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            stop.trigger("interrupted");
        }
    });

    let clock: Arc<dyn Clock> = if realtime {
        Arc::new(SystemClock::new())
    } else {
        Arc::new(SimulatedClock::new())
    };
    let report = executor
        .execute(schedule, &drivers, clock)
        .await
        .context("Execution failed to start")?;

    println!("{}", report.to_json()?);
    if let Some(output) = output {
        report
            .save(&output)
            .with_context(|| format!("Failed to write report to {}", output.display()))?;
        info!(path = %output.display(), "Report written");
    }

    for (component, failure) in report.failures() {
        warn!(component, entry = %failure.origin, error = %failure.error, "Event failed");
    }
    for outcome in report.outcomes.iter().filter(|o| o.aborted.is_some()) {
        warn!(component = %outcome.component, reason = ?outcome.aborted, "Component aborted");
    }
    if report.cancellation.is_some() {
        bail!("Run {} was cancelled", report.experiment_id);
    }
    Ok(())
}
