// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heartbeats and the stale reaper.
//!
//! Heartbeats run as independent periodic tasks that never share the
//! runner's control path: a missed heartbeat must not kill the run, and a
//! wedged run must not silence the heartbeat. The reaper is the other
//! side: rows whose heartbeats stopped are finalised (executions) or
//! parked for cold resume (sessions), and only the rows the guarded pass
//! actually matched get their processes killed.

use std::time::Duration;

use agendo_core::Clock;
use agendo_storage::Store;
use tokio::task::JoinHandle;

use agendo_adapters::KillSignal;

/// Aborts its background task on drop.
pub struct HeartbeatGuard {
    handle: JoinHandle<()>,
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start a per-execution heartbeat task.
pub fn start_execution_heartbeat<C: Clock>(
    store: Store,
    clock: C,
    execution_id: String,
    interval: Duration,
) -> HeartbeatGuard {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = store.execution_heartbeat(&execution_id, clock.epoch_ms()) {
                tracing::warn!(execution_id, error = %e, "execution heartbeat failed");
            }
        }
    });
    HeartbeatGuard { handle }
}

/// Start a per-session heartbeat task.
pub fn start_session_heartbeat<C: Clock>(
    store: Store,
    clock: C,
    session_id: String,
    interval: Duration,
) -> HeartbeatGuard {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = store.session_heartbeat(&session_id, clock.epoch_ms()) {
                tracing::warn!(session_id, error = %e, "session heartbeat failed");
            }
        }
    });
    HeartbeatGuard { handle }
}

/// One stale-reaper pass: expire overdue queue claims, time out executions
/// whose heartbeats stopped, park stale sessions at idle. Kills fire only
/// for rows the guarded transitions matched.
pub fn reap_stale<C: Clock>(store: &Store, clock: &C, threshold: Duration) -> (usize, usize) {
    let now_ms = clock.epoch_ms();
    let threshold_ms = threshold.as_millis() as u64;

    match store.expire_overdue_jobs(now_ms) {
        Ok(expired) if !expired.is_empty() => {
            tracing::info!(count = expired.len(), "released expired queue claims");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "expiring queue claims failed"),
    }

    let executions = match store.reap_stale_executions(threshold_ms, now_ms) {
        Ok(reaped) => {
            for execution in &reaped {
                tracing::warn!(
                    execution_id = %execution.id,
                    pid = execution.pid,
                    "execution heartbeat lost, marked timed_out"
                );
                kill_reaped(execution.pid);
            }
            reaped.len()
        }
        Err(e) => {
            tracing::warn!(error = %e, "reaping stale executions failed");
            0
        }
    };

    let sessions = match store.reap_stale_sessions(threshold_ms, now_ms) {
        Ok(reaped) => {
            for session in &reaped {
                tracing::warn!(
                    session_id = %session.id,
                    pid = session.pid,
                    "session heartbeat lost, parked idle for cold resume"
                );
                kill_reaped(session.pid);
            }
            reaped.len()
        }
        Err(e) => {
            tracing::warn!(error = %e, "reaping stale sessions failed");
            0
        }
    };

    (executions, sessions)
}

/// Kill the orphan's process group; the child was spawned as its own
/// group leader.
fn kill_reaped(pid: Option<u32>) {
    if let Some(pid) = pid {
        if let Err(e) = agendo_adapters::kill_process_group(pid, KillSignal::Term) {
            tracing::debug!(pid, error = %e, "orphan group kill failed (already gone?)");
        }
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
