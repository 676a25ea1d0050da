// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration from environment variables.
//!
//! Loaded once at startup and validated fail-fast: a missing required
//! value or an unparseable number refuses to start the daemon.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use agendo_core::WorkerId;
use thiserror::Error;

/// 5 GiB free at the log directory or the worker refuses to start.
pub const DEFAULT_MIN_FREE_BYTES: u64 = 5 * 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Deployment mode switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvMode {
    Dev,
    Prod,
    Test,
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the durable store (WAL, snapshot, lock, socket).
    pub state_dir: PathBuf,
    pub worker_id: WorkerId,
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub log_dir: PathBuf,
    pub stale_threshold: Duration,
    pub heartbeat_interval: Duration,
    pub allowed_working_dirs: Vec<PathBuf>,
    pub env_mode: EnvMode,
    /// Boundary-only shared secret for terminal tokens; unused by the core.
    pub jwt_secret: Option<String>,
    pub message_root: PathBuf,
    pub min_free_bytes: u64,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load from an explicit variable map (testable without env races).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &'static str| vars.get(name).map(String::as_str);

        let worker_id = get("WORKER_ID")
            .filter(|v| !v.is_empty())
            .map(WorkerId::new)
            .ok_or(ConfigError::Missing("WORKER_ID"))?;

        let allowed_raw = get("ALLOWED_WORKING_DIRS")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("ALLOWED_WORKING_DIRS"))?;
        let mut allowed_working_dirs = Vec::new();
        for part in allowed_raw.split(':').filter(|p| !p.is_empty()) {
            let path = PathBuf::from(part);
            if !path.is_absolute() {
                return Err(ConfigError::Invalid {
                    name: "ALLOWED_WORKING_DIRS",
                    value: part.to_string(),
                });
            }
            allowed_working_dirs.push(path);
        }
        if allowed_working_dirs.is_empty() {
            return Err(ConfigError::Missing("ALLOWED_WORKING_DIRS"));
        }

        let state_dir = get("AGENDO_STATE_DIR")
            .map(PathBuf::from)
            .or_else(default_state_dir)
            .ok_or(ConfigError::Missing("AGENDO_STATE_DIR"))?;

        let env_mode = match get("AGENDO_ENV").unwrap_or("dev") {
            "dev" | "development" => EnvMode::Dev,
            "prod" | "production" => EnvMode::Prod,
            "test" => EnvMode::Test,
            other => {
                return Err(ConfigError::Invalid {
                    name: "AGENDO_ENV",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            state_dir,
            worker_id,
            poll_interval: millis(vars, "WORKER_POLL_INTERVAL_MS", 2_000)?,
            max_concurrent_jobs: number(vars, "WORKER_MAX_CONCURRENT_JOBS", 3)? as usize,
            log_dir: get("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/data/agendo/logs")),
            stale_threshold: millis(vars, "STALE_JOB_THRESHOLD_MS", 120_000)?,
            heartbeat_interval: millis(vars, "HEARTBEAT_INTERVAL_MS", 30_000)?,
            allowed_working_dirs,
            env_mode,
            jwt_secret: get("JWT_SECRET").map(str::to_string),
            message_root: get("AGENDO_MESSAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp/agendo-messages")),
            min_free_bytes: number(vars, "AGENDO_MIN_FREE_BYTES", DEFAULT_MIN_FREE_BYTES)?,
        })
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state_dir.join("agendod.sock")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("agendod.pid")
    }

    pub fn wal_path(&self) -> PathBuf {
        self.state_dir.join("wal").join("events.wal")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join("snapshot.bin")
    }

    pub fn daemon_log_path(&self) -> PathBuf {
        self.state_dir.join("agendod.log")
    }

    /// View for the runner components.
    pub fn runner_config(&self) -> agendo_runner::RunnerConfig {
        let mut config = agendo_runner::RunnerConfig::new(
            self.worker_id.clone(),
            self.log_dir.clone(),
            self.allowed_working_dirs.clone(),
        );
        config.message_root = self.message_root.clone();
        config.heartbeat_interval = self.heartbeat_interval;
        config
    }
}

/// AGENDO_STATE_DIR > XDG_STATE_HOME/agendo > ~/.local/state/agendo
fn default_state_dir() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("agendo"));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local/state/agendo"))
}

fn number(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw.clone(),
        }),
    }
}

fn millis(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    number(vars, name, default).map(Duration::from_millis)
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
