//! Stress harness configuration.
//!
//! [`StressConfig`] is read from `config/lifeline.toml` (or the path given
//! with `--config`).  Every field has a default, so a partial file or no file
//! at all is valid.

use std::path::Path;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

/// Location of the configuration file when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/lifeline.toml";

/// Top-level harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StressConfig {
    pub logging: LoggingConfig,
    pub dispose: DisposeConfig,
    pub lock: LockConfig,
    pub schedule: ScheduleConfig,
    pub mailbox: MailboxConfig,
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

/// `[dispose]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisposeConfig {
    /// Threads racing `dispose()` on the same object.
    pub disposers: usize,
    /// Independent races; each must run the teardown hook exactly once.
    pub rounds: usize,
}

impl Default for DisposeConfig {
    fn default() -> Self {
        Self {
            disposers: 16,
            rounds: 50,
        }
    }
}

/// `[lock]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    pub tasks: usize,
    /// Increments performed by each task.
    pub rounds: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            tasks: 32,
            rounds: 100,
        }
    }
}

/// `[schedule]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub producers: usize,
    pub per_producer: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            producers: 10,
            per_producer: 100,
        }
    }
}

/// `[mailbox]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailboxConfig {
    /// Request/response round trips between client and server.
    pub messages: usize,
    /// Foreign messages posted to the server by a third thread.
    pub noise: usize,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            messages: 100,
            noise: 50,
        }
    }
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    Defaults,
}

impl StressConfig {
    /// Load the configuration at `path`.
    ///
    /// A missing file yields the defaults; an unreadable or malformed file is
    /// an error naming the path.
    pub fn load(path: &Path) -> Result<(Self, ConfigSource)> {
        if !path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok((config, ConfigSource::File))
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject thread counts a scenario cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.dispose.disposers > 0, "[dispose] disposers must be at least 1");
        ensure!(self.lock.tasks > 0, "[lock] tasks must be at least 1");
        ensure!(self.schedule.producers > 0, "[schedule] producers must be at least 1");
        Ok(())
    }
}
