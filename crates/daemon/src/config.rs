// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration
//!
//! Loaded from an optional TOML file; every key has a default.

use depot_engine::{DispatcherConfig, MaintenanceConfig, RunnerConfig};
use depot_storage::JournalConfig;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the config file when no argument is given
pub const CONFIG_ENV: &str = "DEPOT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not determine state directory")]
    NoStateDir,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Directory holding the socket, lock file, log and WAL
    pub state_dir: Option<PathBuf>,
    /// Worker pool size
    pub workers: usize,
    /// How often the schedule runner looks for due schedules
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Longest a task waits for its reservation; `"none"` waits forever
    #[serde(deserialize_with = "optional_duration")]
    pub reservation_timeout: Option<Duration>,
    /// Socket read/write timeout per request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Importer type ids served by no-op plugins
    pub importer_types: Vec<String>,
    /// Distributor type ids served by no-op plugins
    pub distributor_types: Vec<String>,
    /// WAL entries between automatic checkpoints; 0 leaves it to maintenance
    pub checkpoint_every: u64,
    /// How often finished records are pruned and the journal checkpointed
    #[serde(with = "humantime_serde")]
    pub maintenance_interval: Duration,
    /// How long finished tasks stay queryable; `"none"` keeps them
    #[serde(deserialize_with = "optional_duration")]
    pub task_retention: Option<Duration>,
    /// How long sync and publish history is kept; `"none"` keeps it
    #[serde(deserialize_with = "optional_duration")]
    pub history_retention: Option<Duration>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            workers: 4,
            tick_interval: Duration::from_secs(5),
            reservation_timeout: Some(Duration::from_secs(3600)),
            request_timeout: Duration::from_secs(5),
            importer_types: vec!["yum_importer".to_string()],
            distributor_types: vec!["yum_distributor".to_string()],
            checkpoint_every: 1000,
            maintenance_interval: Duration::from_secs(600),
            task_retention: Some(Duration::from_secs(7 * 24 * 3600)),
            history_retention: Some(Duration::from_secs(30 * 24 * 3600)),
        }
    }
}

impl DaemonConfig {
    /// Load from `path`, or return defaults when there is no file to read
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Config file named by the first argument, else by `$DEPOT_CONFIG`
    pub fn path_from(args: &[String], env: Option<String>) -> Option<PathBuf> {
        args.get(1)
            .map(PathBuf::from)
            .or_else(|| env.filter(|p| !p.is_empty()).map(PathBuf::from))
    }

    pub fn paths(&self) -> Result<Paths, ConfigError> {
        let state_dir = match &self.state_dir {
            Some(dir) => dir.clone(),
            None => default_state_dir()?,
        };
        Ok(Paths::new(state_dir))
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.workers.max(1),
            reservation_timeout: self.reservation_timeout,
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            tick: self.tick_interval,
        }
    }

    pub fn journal_config(&self) -> JournalConfig {
        JournalConfig {
            checkpoint_every: self.checkpoint_every,
        }
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig::new()
            .with_interval(self.maintenance_interval.max(Duration::from_secs(1)))
            .with_task_retention(self.task_retention)
            .with_history_retention(self.history_retention)
    }
}

/// Files the daemon keeps under its state directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    /// Lock file, also holding the PID
    pub lock_path: PathBuf,
    pub log_path: PathBuf,
    pub wal_path: PathBuf,
}

impl Paths {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            socket_path: state_dir.join("depotd.sock"),
            lock_path: state_dir.join("depotd.pid"),
            log_path: state_dir.join("depotd.log"),
            wal_path: state_dir.join("wal").join("depot.wal"),
            state_dir,
        }
    }
}

/// `$XDG_STATE_HOME/depot`, falling back to the platform state directory
fn default_state_dir() -> Result<PathBuf, ConfigError> {
    if let Some(xdg) = std::env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join("depot"));
    }
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("state")))
        .map(|dir| dir.join("depot"))
        .ok_or(ConfigError::NoStateDir)
}

fn optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if raw.trim().eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    humantime::parse_duration(raw.trim())
        .map(Some)
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
