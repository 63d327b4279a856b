//! Headless formation runner.
//!
//! # Usage
//!
//! ```bash
//! # Stream events for the built-in patrol
//! cargo run -p squadron_headless -- run
//!
//! # Run a scenario file for a fixed number of ticks
//! cargo run -p squadron_headless -- run --scenario scenarios/patrol.ron --ticks 3000
//!
//! # Verify determinism
//! cargo run -p squadron_headless -- verify --scenario scenarios/patrol.ron --runs 8
//!
//! # Measure throughput
//! cargo run -p squadron_headless -- bench --ticks 30000
//! ```
//!
//! Output (stdout): JSON lines, one per event, then a summary
//! Logs (stderr): filtered by `RUST_LOG` (default `info`), `--verbose` forces `debug`

use std::io::BufWriter;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use squadron_headless::{
    runner::{bench, verify, ScenarioRunner},
    scenario::Scenario,
};

#[derive(Parser)]
#[command(name = "squadron_headless")]
#[command(about = "Headless formation runner for CI and tuning")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario and stream its events
    Run {
        /// Scenario file to load (built-in patrol if omitted)
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Override the scenario's tick count
        #[arg(short, long)]
        ticks: Option<u64>,
    },

    /// Verify determinism by running the same scenario several times
    Verify {
        /// Scenario file to load (built-in patrol if omitted)
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Number of verification runs
        #[arg(short, long, default_value = "4")]
        runs: usize,
    },

    /// Run N ticks for benchmarking
    Bench {
        /// Scenario file to load (built-in patrol if omitted)
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Number of ticks to run
        #[arg(short, long, default_value = "30000")]
        ticks: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging to stderr (stdout is for events)
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    match cli.command {
        Some(Commands::Run { scenario, ticks }) => cmd_run(scenario, ticks),
        Some(Commands::Verify { scenario, runs }) => cmd_verify(scenario, runs),
        Some(Commands::Bench { scenario, ticks }) => cmd_bench(scenario, ticks),
        None => cmd_run(None, None),
    }
}

fn load_scenario(path: Option<PathBuf>) -> Scenario {
    let Some(path) = path else {
        return Scenario::patrol();
    };
    tracing::info!("Using scenario: {}", path.display());
    match Scenario::load(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load scenario: {}", e);
            std::process::exit(1);
        }
    }
}

/// Run a scenario, writing events to stdout
fn cmd_run(scenario: Option<PathBuf>, ticks: Option<u64>) {
    let mut scenario = load_scenario(scenario);
    if let Some(ticks) = ticks {
        scenario.ticks = ticks;
    }

    let mut runner = match ScenarioRunner::new(scenario) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to start scenario: {}", e);
            std::process::exit(1);
        }
    };

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    match runner.run(&mut out) {
        Ok(summary) => {
            tracing::info!(
                ticks = summary.ticks,
                units = summary.units,
                occupied = summary.occupied_slots,
                slots = summary.slot_count,
                concussions = summary.concussions,
                deaths = summary.deaths,
                rejected = summary.rejected_actions,
                hash = %format!("{:016x}", summary.state_hash),
                "Run complete"
            );
        }
        Err(e) => {
            eprintln!("Run failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Verify determinism
fn cmd_verify(scenario: Option<PathBuf>, runs: usize) {
    let scenario = load_scenario(scenario);
    tracing::info!(
        "Verifying determinism: {} ({} runs, {} ticks)",
        scenario.name,
        runs,
        scenario.ticks
    );

    let report = match verify(&scenario, runs) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("FAIL: Error during verification: {}", e);
            std::process::exit(1);
        }
    };

    if report.is_deterministic() {
        eprintln!("PASS: All {} runs produced identical results", runs);
        if let Some(hash) = report.hashes.first() {
            eprintln!("  Final hash: {:016x}", hash);
        }
    } else {
        eprintln!("FAIL: Non-determinism detected!");
        for (i, hash) in report.hashes.iter().enumerate() {
            eprintln!("  Run {}: {:016x}", i, hash);
        }
        std::process::exit(1);
    }
}

/// Run benchmark
fn cmd_bench(scenario: Option<PathBuf>, ticks: u64) {
    let scenario = load_scenario(scenario);
    tracing::info!("Running {} tick benchmark", ticks);

    match bench(&scenario, ticks) {
        Ok(report) => {
            eprintln!("Benchmark complete:");
            eprintln!("  Ticks: {}", report.ticks);
            eprintln!("  Units: {}", report.units);
            eprintln!("  Time: {:?}", report.elapsed);
            eprintln!("  Ticks/sec: {:.0}", report.ticks_per_second());
            eprintln!("  Final hash: {:016x}", report.state_hash);
        }
        Err(e) => {
            eprintln!("Benchmark failed: {}", e);
            std::process::exit(1);
        }
    }
}
