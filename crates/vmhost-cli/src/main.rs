//! vmhost runner.
//!
//! Loads a world description and a list of transactions, runs them in
//! order on the wasmtime-backed host and prints one JSON report per
//! transaction. Successful deployments and calls are committed to the
//! world before the next transaction runs; queries never are.

mod runner;
mod scenario;
mod telemetry;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use vmhost::{GasSchedule, HostConfig};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "vmhost")]
#[command(about = "Run smart contract transactions against an in-memory world")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// World description (JSON)
    #[arg(short, long, value_name = "FILE")]
    world: PathBuf,

    /// Transactions to run, in order (JSON)
    #[arg(short, long, value_name = "FILE")]
    transactions: PathBuf,

    /// Host configuration (TOML)
    #[arg(short, long, value_name = "FILE", env = "VMHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Gas schedule (TOML); every operation costs one unit without it
    #[arg(short, long, value_name = "FILE", env = "VMHOST_GAS_SCHEDULE")]
    gas_schedule: Option<PathBuf>,

    /// Log filter, e.g. "info" or "vmhost=trace"
    #[arg(short, long, default_value = "warn", env = "VMHOST_LOG")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init_telemetry(&args.log_level, args.json_logs)?;

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            HostConfig::from_file(path)?
        }
        None => HostConfig::default(),
    };
    let gas_schedule = match &args.gas_schedule {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading gas schedule {}", path.display()))?;
            GasSchedule::from_toml(&contents)?
        }
        None => GasSchedule::uniform(1),
    };

    let world = scenario::load_world(&args.world)?;
    let transactions = scenario::load_transactions(&args.transactions)?;
    info!(
        accounts = world.accounts.len(),
        transactions = transactions.len(),
        "starting run"
    );

    let mut runner = runner::Runner::new(
        config,
        gas_schedule,
        &world,
        &args.world,
        &args.transactions,
    )?;
    let reports = runner.run_all(&transactions)?;
    info!(accounts = runner.world().accounts().count(), "run finished");
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
