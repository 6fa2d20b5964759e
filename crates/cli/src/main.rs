//! Unitvault Command Line Interface
//!
//! Validates engine configuration files and replays JSON scenarios against an
//! in-memory ledger, printing each committed reference or rejection.

mod scenario;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use unitvault_ledger::EngineConfig;

use crate::scenario::{Scenario, Simulation};

#[derive(Parser)]
#[command(name = "unitvault")]
#[command(about = "Unitvault ledger command line interface", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate an engine configuration file
    CheckConfig {
        /// Path to the engine TOML configuration
        #[arg(long)]
        config: PathBuf,
    },
    /// Replay a JSON scenario against an in-memory ledger
    Simulate {
        /// Path to the engine TOML configuration
        #[arg(long)]
        config: PathBuf,
        /// Path to the JSON scenario
        #[arg(long)]
        script: PathBuf,
        /// Print the final ledger snapshot as JSON
        #[arg(long)]
        snapshot: bool,
        /// Stop at the first rejected step
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::CheckConfig { config } => handle_check_config(config),
        Commands::Simulate {
            config,
            script,
            snapshot,
            strict,
        } => handle_simulate(config, script, snapshot, strict),
    }
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn handle_check_config(path: PathBuf) -> Result<()> {
    let config = EngineConfig::load(&path)
        .with_context(|| format!("invalid configuration {}", path.display()))?;
    info!(target: "unitvault", "Configuration OK: {}", path.display());

    println!("{}", serde_json::to_string_pretty(&config)?);
    if let Some(liability) = config.params.total_grant_liability() {
        info!(
            target: "unitvault",
            "Full supply locks {} {} in unit grants",
            liability,
            config.tokens.native
        );
    }
    Ok(())
}

fn handle_simulate(
    config_path: PathBuf,
    script_path: PathBuf,
    print_snapshot: bool,
    strict: bool,
) -> Result<()> {
    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("invalid configuration {}", config_path.display()))?;
    let raw = fs::read_to_string(&script_path)
        .with_context(|| format!("failed to read scenario {}", script_path.display()))?;
    let scenario = Scenario::from_json(&raw)
        .with_context(|| format!("failed to parse scenario {}", script_path.display()))?;

    info!(
        target: "unitvault",
        "Replaying {} steps from {}",
        scenario.steps.len(),
        script_path.display()
    );
    let mut simulation = Simulation::new(config, scenario.start_time)?;
    let summary = simulation.run(&scenario.steps, strict)?;

    println!(
        "\n{} committed, {} rejected, final sequence {}",
        summary.committed, summary.rejected, summary.sequence
    );

    if print_snapshot {
        let snapshot = simulation.engine().snapshot();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    if strict && summary.rejected > 0 {
        anyhow::bail!("scenario stopped at a rejected step");
    }
    Ok(())
}
