//! CLI argument definitions for the `lifeline` stress harness.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.  Every per-scenario flag is optional; when
//! omitted the value comes from the loaded [`StressConfig`](crate::config::StressConfig).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// lifeline -- stress harness for the lifeline synchronization primitives.
#[derive(Parser)]
#[command(
    name = "lifeline",
    version,
    about = "Stress harness for the lifeline synchronization primitives",
    long_about = "Races disposal, locking, cross-thread scheduling and sender-filtered \
                  mailboxes under configurable load and checks their invariants."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = crate::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level used when `RUST_LOG` is not set (overrides `[logging] level`).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Race many threads disposing one object while a run-lock is held.
    Dispose {
        /// Number of racing disposer threads.
        #[arg(long)]
        disposers: Option<usize>,
        /// Number of independent races.
        #[arg(long)]
        rounds: Option<usize>,
    },

    /// Increment a shared counter from many tasks under the async lock.
    Lock {
        /// Number of tokio tasks.
        #[arg(long)]
        tasks: Option<usize>,
        /// Increments per task.
        #[arg(long)]
        rounds: Option<usize>,
    },

    /// Schedule callbacks onto a joinable thread from many producers.
    Schedule {
        /// Number of producer threads.
        #[arg(long)]
        producers: Option<usize>,
        /// Callbacks scheduled by each producer.
        #[arg(long)]
        per_producer: Option<usize>,
    },

    /// Run request/response round trips while a third thread adds noise.
    Mailbox {
        /// Number of round trips.
        #[arg(long)]
        messages: Option<usize>,
        /// Number of foreign messages posted to the server.
        #[arg(long)]
        noise: Option<usize>,
    },

    /// Run every scenario in sequence.
    All,
}
