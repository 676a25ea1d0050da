// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, recovery.

use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tokio::net::UnixListener;
use tokio::sync::Notify;
use thiserror::Error;
use tracing::{info, warn};

use agendo_storage::Store;

use crate::env::Config;
use crate::listener::ListenCtx;
use crate::worker::{SessionRegistry, Worker};

/// Group-commit flush cadence for the WAL.
const WAL_FLUSH_INTERVAL: Duration = Duration::from_millis(20);

/// Background checkpoint cadence.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::env::ConfigError),

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("insufficient disk space at {path}: {free} bytes free, {required} required")]
    DiskSpace {
        path: String,
        free: u64,
        required: u64,
    },

    #[error("failed to bind socket at {0}: {1}")]
    BindFailed(String, std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] agendo_storage::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon state during operation.
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): held to maintain the exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub store: Store,
    pub worker: Arc<Worker>,
    pub sessions: SessionRegistry,
    pub start_time: Instant,
}

/// Result of daemon startup.
pub struct StartupResult {
    pub daemon: DaemonState,
    /// The bound socket, to be wrapped in a Listener task.
    pub listener: UnixListener,
    /// Shutdown trigger shared with the listener.
    pub shutdown: Arc<Notify>,
}

impl std::fmt::Debug for StartupResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupResult").finish_non_exhaustive()
    }
}

impl DaemonState {
    pub fn listen_ctx(&self, shutdown: Arc<Notify>) -> ListenCtx {
        ListenCtx {
            store: self.store.clone(),
            config: self.config.clone(),
            sessions: self.sessions.clone(),
            start_time: self.start_time,
            shutdown,
        }
    }

    /// Remove the runtime files. The lock releases when `self` drops.
    pub fn cleanup(&self) {
        for path in [self.config.socket_path(), self.config.lock_path()] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "cleanup failed");
                }
            }
        }
        info!("daemon shutdown complete");
    }
}

/// Start the daemon: fail-fast checks, lock, store recovery, zombie
/// reconciliation, background flush/checkpoint loops.
pub async fn startup(config: Config) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;
    std::fs::create_dir_all(&config.log_dir)?;

    // Below the free-space floor the worker refuses to start rather than
    // fill the disk mid-run
    let free = fs2::available_space(&config.log_dir)?;
    if free < config.min_free_bytes {
        return Err(LifecycleError::DiskSpace {
            path: config.log_dir.display().to_string(),
            free,
            required: config.min_free_bytes,
        });
    }

    // Single-instance lock, held for the daemon's lifetime. Open without
    // truncating: a losing contender must not clobber the winner's pid.
    let mut lock_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(config.lock_path())
        .map_err(LifecycleError::LockFailed)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    let _ = writeln!(lock_file, "{}", std::process::id());

    // A stale socket from a crashed daemon blocks bind
    let socket_path = config.socket_path();
    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }
    let listener = UnixListener::bind(&socket_path)
        .map_err(|e| LifecycleError::BindFailed(socket_path.display().to_string(), e))?;

    let store = Store::open(&config.wal_path(), &config.snapshot_path())?;

    let sessions = SessionRegistry::default();
    let worker = Arc::new(Worker::new(
        store.clone(),
        config.clone(),
        sessions.clone(),
    ));

    // Repair rows left behind by a previous life of this worker id,
    // before any polling starts
    worker.reconcile_zombies();

    spawn_flush_loop(store.clone());
    spawn_checkpoint_loop(store.clone());

    info!(worker_id = %config.worker_id, "daemon started");

    Ok(StartupResult {
        daemon: DaemonState {
            lock_file,
            store,
            worker,
            sessions,
            start_time: Instant::now(),
            config,
        },
        listener,
        shutdown: Arc::new(Notify::new()),
    })
}

/// Group commit: flush buffered WAL entries on a short interval.
fn spawn_flush_loop(store: Store) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(WAL_FLUSH_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if let Err(e) = store.flush_if_needed() {
                tracing::warn!(error = %e, "WAL flush failed");
            }
        }
    });
}

/// Periodic snapshot + WAL truncation keeps restart replay short.
fn spawn_checkpoint_loop(store: Store) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(CHECKPOINT_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would snapshot an empty diff
        tick.tick().await;
        loop {
            tick.tick().await;
            match tokio::task::block_in_place(|| store.checkpoint()) {
                Ok(seq) => tracing::debug!(seq, "checkpoint saved"),
                Err(e) => tracing::warn!(error = %e, "checkpoint failed"),
            }
        }
    });
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
