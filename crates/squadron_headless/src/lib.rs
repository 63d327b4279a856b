//! Headless formation runner for CI verification and tuning.
//!
//! Runs scripted scenarios against the simulation without any
//! presentation layer:
//!
//! - **Event streams**: every simulation event as a JSON line on stdout
//! - **Determinism checks**: the same scenario run in parallel must end in
//!   the same state hash
//! - **Throughput**: ticks per second for a scenario
//!
//! # Output
//!
//! - **stdout**: events and the final summary (JSON lines)
//! - **stderr**: logs (human-readable)
//!
//! # Example
//!
//! ```bash
//! # Run the built-in patrol
//! cargo run -p squadron_headless -- run
//!
//! # Run a scenario file
//! cargo run -p squadron_headless -- run --scenario scenarios/patrol.ron
//!
//! # Verify determinism
//! cargo run -p squadron_headless -- verify --runs 8
//! ```

pub mod runner;
pub mod scenario;

pub use runner::{bench, verify, BenchReport, RunSummary, ScenarioRunner, VerifyReport};
pub use scenario::{Action, Scenario, ScenarioError};
