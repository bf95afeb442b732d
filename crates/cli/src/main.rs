//! Hostpool - configuration checker and soak driver
//!
//! `hostpool test` validates a configuration file. `hostpool soak` drives a
//! pool with simulated sessions from many threads and verifies its limits.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use hostpool_common::{init_logging, LogOptions};
use hostpool_config::Config;

mod soak;

/// Hostpool - per-host connection pool tooling
#[derive(Parser, Debug)]
#[command(name = "hostpool")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "HOSTPOOL_CONFIG", global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long = "json-logs", global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file and exit
    Test,
    /// Exercise a pool with simulated sessions and check its invariants
    Soak(soak::SoakArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogOptions {
        verbose: cli.verbose,
        json: cli.json_logs,
    });

    match cli.command {
        Commands::Test => test_config(cli.config.as_deref()),
        Commands::Soak(args) => {
            let config = load_config(cli.config.as_deref())?;
            soak::run(&config, &args)
        }
    }
}

/// Load the given configuration file, or the embedded default.
fn load_config(config_path: Option<&str>) -> Result<Config> {
    let config = match config_path {
        Some(path) => {
            info!("Loading configuration file: {}", path);
            Config::from_file(path).context("Failed to load configuration file")?
        }
        None => {
            info!("Using embedded default configuration");
            Config::default_embedded().context("Failed to load embedded configuration")?
        }
    };

    let result = config.validate().context("Configuration validation failed")?;
    for warning in &result.warnings {
        warn!("{}", warning);
    }
    Ok(config)
}

/// Test configuration file and exit
fn test_config(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let pool = config.pool.normalized();

    info!("Configuration test successful:");
    info!(
        "  - pool: max {} cached / {} concurrent per host, idle timeout {:?}",
        pool.max_cached, pool.max_concurrent, pool.idle_timeout
    );
    info!("  - guard: max {} sessions in total", config.guard.max_total);
    info!("  - maintenance: sweep every {:?}", config.maintenance.sweep_interval);

    println!(
        "hostpool: configuration file {} test is successful",
        config_path.unwrap_or("(embedded)")
    );
    Ok(())
}
