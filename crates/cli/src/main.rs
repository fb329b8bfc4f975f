//! Experiment orchestration CLI.
//!
//! This binary is the operator entry point for experiment runs. It provides:
//! 1. **Replay:** Run a configured experiment against recorded engine traces, on one
//!    machine or two linked machines depending on the configured topology.
//! 2. **Script:** Render the guest run-script(s) an experiment boots with.
//! 3. **Check:** Classify a directory of run logs and list the runs to repeat.
//! 4. **Validate:** Load a configuration and report whether it is usable.

use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use simphase_core::analysis::{self, DEFAULT_EXPECTED_INVOCATIONS};
use simphase_core::common::{ExitStatus, NodeId};
use simphase_core::config::Topology;
use simphase_core::engine::{ScriptedEngine, Trace};
use simphase_core::stats::{REPORT_SECTIONS, RunReport};
use simphase_core::{Config, DualNodeSynchronizer, Experiment, OrchestratorError, script};

#[derive(Parser, Debug)]
#[command(
    name = "simphase",
    author,
    version,
    about = "Experiment-phase orchestration for full-system simulation",
    long_about = "Sequence boot, container setup, warm-up and measurement for simulated serverless experiments.\n\nExamples:\n  simphase validate --config exp.json\n  simphase script --config exp.json --out run/\n  simphase replay --config exp.json --trace node0.json\n  simphase replay --config dual.json --trace node0.json --trace-b node1.json\n  simphase check results/ --expected 20"
)]
struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an experiment against recorded engine traces and print its report.
    Replay {
        /// Experiment configuration (JSON).
        #[arg(short, long)]
        config: PathBuf,

        /// Trace for the system under test.
        #[arg(short, long)]
        trace: PathBuf,

        /// Trace for the driving node (dual topology only).
        #[arg(long)]
        trace_b: Option<PathBuf>,

        /// Also write the report(s) as JSON to this file.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Report sections to print (summary, phases, invocations, side_effects).
        #[arg(long, value_delimiter = ',')]
        sections: Vec<String>,
    },

    /// Write the guest run-script(s) for a configuration.
    Script {
        /// Experiment configuration (JSON).
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Check a results directory of run logs.
    Check {
        /// Directory with one subdirectory per run.
        dir: PathBuf,

        /// Invocations a complete run logs.
        #[arg(long, default_value_t = DEFAULT_EXPECTED_INVOCATIONS)]
        expected: u64,
    },

    /// Load and validate a configuration.
    Validate {
        /// Experiment configuration (JSON).
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    info!(
        "command line: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );

    let result = match cli.command {
        Commands::Replay {
            config,
            trace,
            trace_b,
            report,
            sections,
        } => cmd_replay(&config, &trace, trace_b.as_deref(), report.as_deref(), &sections),
        Commands::Script { config, out } => cmd_script(&config, &out),
        Commands::Check { dir, expected } => cmd_check(&dir, expected),
        Commands::Validate { config } => cmd_validate(&config),
    };

    match result {
        Ok(status) => process::exit(status.code()),
        Err(e) => {
            error!("{e}");
            eprintln!("\n[!] {e}");
            process::exit(e.exit_code());
        }
    }
}

/// Installs the `fmt` subscriber, honouring `RUST_LOG` when set.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Replays one or two traces through the configured experiment.
///
/// # Arguments
///
/// * `config_path` - Experiment configuration.
/// * `trace` - Trace of the system under test.
/// * `trace_b` - Trace of the driving node; required for the dual topology.
/// * `report_path` - Optional JSON report destination.
/// * `sections` - Report sections to print, empty for all.
///
/// # Returns
///
/// The exit status of the finished experiment.
///
/// # Errors
///
/// Configuration, trace loading, checkpoint, engine and synchronization failures.
fn cmd_replay(
    config_path: &Path,
    trace: &Path,
    trace_b: Option<&Path>,
    report_path: Option<&Path>,
    sections: &[String],
) -> Result<ExitStatus, OrchestratorError> {
    for s in sections {
        if !REPORT_SECTIONS.contains(&s.as_str()) {
            eprintln!("unknown report section '{s}' (known: {})", REPORT_SECTIONS.join(", "));
            return Ok(ExitStatus::Config);
        }
    }

    let config = Config::from_file(config_path)?;
    let set = config.core_set();
    let primary = ScriptedEngine::from_core_set(
        NodeId::PRIMARY,
        &set,
        config.cores.num_cores,
        load_trace(trace)?,
    );

    match config.topology {
        Topology::Single => {
            let mut experiment = Experiment::new(&config, primary)?;
            let report = experiment.run()?;
            report.print_sections(sections);
            if let Some(path) = report_path {
                write_json(path, &serde_json::to_value(&report).map_err(|e| invalid(path, e))?)?;
            }
            Ok(report.exit_status())
        }
        Topology::Dual => {
            let Some(trace_b) = trace_b else {
                eprintln!("the dual topology needs --trace-b for the driving node");
                return Ok(ExitStatus::Config);
            };
            let driver = ScriptedEngine::from_core_set(
                NodeId::DRIVER,
                &set,
                config.cores.driver_cores,
                load_trace(trace_b)?,
            );
            let mut sync = DualNodeSynchronizer::new(&config, primary, driver)?;
            let report = sync.run()?;
            report.primary.print_sections(sections);
            report.driver.print_sections(sections);
            println!("rounds {}  packets {}", report.rounds, report.packets);
            if let Some(path) = report_path {
                let json = serde_json::json!({
                    "primary": report.primary,
                    "driver": report.driver,
                    "rounds": report.rounds,
                    "packets": report.packets,
                });
                write_json(path, &json)?;
            }
            Ok(worst(&report.primary, &report.driver))
        }
    }
}

/// Writes the run-script(s) for the configured topology into `out`.
fn cmd_script(config_path: &Path, out: &Path) -> Result<ExitStatus, OrchestratorError> {
    let config = Config::from_file(config_path)?;
    for path in script::write_run_script(out, &config)? {
        println!("wrote {}", path.display());
    }
    Ok(ExitStatus::Success)
}

/// Prints the per-run classification and the commands to repeat failed runs.
fn cmd_check(dir: &Path, expected: u64) -> Result<ExitStatus, OrchestratorError> {
    let report = analysis::check_results_dir(dir, expected)?;
    report.print();
    let reruns = report.rerun_commands();
    if !reruns.is_empty() {
        println!("\nRe-run:");
        for cmd in &reruns {
            println!("{cmd}");
        }
    }
    Ok(ExitStatus::Success)
}

fn cmd_validate(config_path: &Path) -> Result<ExitStatus, OrchestratorError> {
    let config = Config::from_file(config_path)?;
    config.validate()?;
    println!(
        "{}: ok ({} mode, {:?} topology, workload {})",
        config_path.display(),
        config.experiment.mode,
        config.topology,
        config.experiment.workload
    );
    Ok(ExitStatus::Success)
}

fn load_trace(path: &Path) -> Result<Trace, OrchestratorError> {
    let text = std::fs::read_to_string(path).map_err(|source| OrchestratorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Trace::from_json_str(&text).map_err(|e| invalid(path, e))
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), OrchestratorError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| invalid(path, e))?;
    std::fs::write(path, text).map_err(|source| OrchestratorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(path: &Path, e: serde_json::Error) -> OrchestratorError {
    OrchestratorError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    }
}

/// A dual run succeeds only when both machines do.
const fn worst(primary: &RunReport, driver: &RunReport) -> ExitStatus {
    match (primary.exit_status(), driver.exit_status()) {
        (ExitStatus::Success, other) => other,
        (status, _) => status,
    }
}
