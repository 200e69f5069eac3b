//! CLI entry point for the lifeline stress harness.
//!
//! This binary provides the `lifeline` command.  Each subcommand drives one
//! primitive from `lifeline-sync` under load and prints the invariants it
//! checked; the process exits non-zero if any of them failed.

mod cli;
mod config;
mod helpers;
mod scenarios;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use crate::cli::{Cli, Commands};
use crate::config::{ConfigSource, StressConfig};
use crate::helpers::init_tracing;
use crate::scenarios::ScenarioReport;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, source) = StressConfig::load(&cli.config)?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_tracing(&level);

    match source {
        ConfigSource::File => info!(path = %cli.config.display(), "configuration loaded"),
        ConfigSource::Defaults => {
            info!(path = %cli.config.display(), "configuration file not found, using defaults")
        }
    }

    apply_overrides(&mut config, &cli.command);
    config.validate()?;

    let reports = match cli.command {
        Commands::Dispose { .. } => vec![cmd_dispose(&config).await?],
        Commands::Lock { .. } => vec![scenarios::run_lock(&config.lock).await?],
        Commands::Schedule { .. } => vec![cmd_schedule(&config).await?],
        Commands::Mailbox { .. } => vec![cmd_mailbox(&config).await?],
        Commands::All => vec![
            cmd_dispose(&config).await?,
            scenarios::run_lock(&config.lock).await?,
            cmd_schedule(&config).await?,
            cmd_mailbox(&config).await?,
        ],
    };

    summarize(&reports)
}

/// Fold per-subcommand flags into the loaded configuration.
fn apply_overrides(config: &mut StressConfig, command: &Commands) {
    match *command {
        Commands::Dispose { disposers, rounds } => {
            if let Some(n) = disposers {
                config.dispose.disposers = n;
            }
            if let Some(n) = rounds {
                config.dispose.rounds = n;
            }
        }
        Commands::Lock { tasks, rounds } => {
            if let Some(n) = tasks {
                config.lock.tasks = n;
            }
            if let Some(n) = rounds {
                config.lock.rounds = n;
            }
        }
        Commands::Schedule {
            producers,
            per_producer,
        } => {
            if let Some(n) = producers {
                config.schedule.producers = n;
            }
            if let Some(n) = per_producer {
                config.schedule.per_producer = n;
            }
        }
        Commands::Mailbox { messages, noise } => {
            if let Some(n) = messages {
                config.mailbox.messages = n;
            }
            if let Some(n) = noise {
                config.mailbox.noise = n;
            }
        }
        Commands::All => {}
    }
}

// ---------------------------------------------------------------------------
// Blocking scenarios
// ---------------------------------------------------------------------------

async fn cmd_dispose(config: &StressConfig) -> Result<ScenarioReport> {
    let dispose = config.dispose.clone();
    blocking(move || scenarios::run_dispose(&dispose)).await
}

async fn cmd_schedule(config: &StressConfig) -> Result<ScenarioReport> {
    let schedule = config.schedule.clone();
    blocking(move || scenarios::run_schedule(&schedule)).await
}

async fn cmd_mailbox(config: &StressConfig) -> Result<ScenarioReport> {
    let mailbox = config.mailbox.clone();
    blocking(move || scenarios::run_mailbox(&mailbox)).await
}

/// Run a thread-blocking scenario off the async workers.
async fn blocking<F>(scenario: F) -> Result<ScenarioReport>
where
    F: FnOnce() -> Result<ScenarioReport> + Send + 'static,
{
    tokio::task::spawn_blocking(scenario)
        .await
        .context("scenario thread panicked")?
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn summarize(reports: &[ScenarioReport]) -> Result<()> {
    println!();
    for report in reports {
        print!("{report}");
    }
    println!();

    let failed: Vec<_> = reports
        .iter()
        .filter(|r| !r.passed())
        .map(|r| r.name)
        .collect();
    if failed.is_empty() {
        info!(scenarios = reports.len(), "all invariants held");
        Ok(())
    } else {
        error!(failed = ?failed, "invariants violated");
        anyhow::bail!("{} scenario(s) failed: {}", failed.len(), failed.join(", "))
    }
}
