// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker loop: queue polling with a bounded pool, zombie
//! reconciliation, heartbeats, the stale reaper, and graceful drain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agendo_adapters::{kill_process_group, pid_alive, KillSignal};
use agendo_core::{
    Clock, ExecutionStatus, ExecutionUsage, QueueName, SessionStatus, SystemClock,
};
use agendo_runner::{heartbeat, Runner, SessionCommand, SessionControl};
use agendo_storage::Store;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use crate::env::Config;

/// How long in-flight handlers get to finish at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(25);

/// Live session supervisors on this worker, keyed by session id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, SessionControl>>>,
}

impl SessionRegistry {
    pub fn insert(&self, session_id: &str, control: SessionControl) {
        self.inner.lock().insert(session_id.to_string(), control);
    }

    pub fn remove(&self, session_id: &str) {
        self.inner.lock().remove(session_id);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionControl> {
        self.inner.lock().get(session_id).cloned()
    }

    /// Mark every live session terminating. Synchronous on purpose: a
    /// termination signal delivered to the process group also hits the
    /// children, and their exit callbacks must already know the
    /// termination was intentional.
    pub fn mark_all_terminating(&self) {
        for control in self.inner.lock().values() {
            control.mark_terminating();
        }
    }

    /// Ask every remaining supervisor to terminate (drain deadline hit).
    pub fn terminate_all(&self) {
        for control in self.inner.lock().values() {
            let _ = control.commands.try_send(SessionCommand::Terminate);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// The polling worker.
pub struct Worker {
    store: Store,
    runner: Runner<SystemClock>,
    config: Config,
    clock: SystemClock,
    sessions: SessionRegistry,
    pool: Arc<Semaphore>,
    shutting_down: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Worker {
    pub fn new(store: Store, config: Config, sessions: SessionRegistry) -> Self {
        let runner = Runner::new(store.clone(), config.runner_config(), SystemClock);
        let pool = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Self {
            store,
            runner,
            config,
            clock: SystemClock,
            sessions,
            pool,
            shutting_down: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutting_down)
    }

    /// One-shot startup repair: rows left non-terminal by a previous life
    /// of this worker id.
    pub fn reconcile_zombies(&self) {
        let worker_id = &self.config.worker_id;
        let now_ms = self.clock.epoch_ms();

        for execution in self.store.executions_owned_by(worker_id) {
            let alive = execution.pid.map(pid_alive).unwrap_or(false);
            if alive {
                // Let normal handling proceed: the child dies on SIGTERM
                // and the reaper times the row out once heartbeats stop
                if let Some(pid) = execution.pid {
                    tracing::warn!(execution_id = %execution.id, pid, "zombie with live pid, terminating");
                    let _ = kill_process_group(pid, KillSignal::Term);
                }
                continue;
            }
            tracing::warn!(execution_id = %execution.id, "orphaned execution, marking failed");
            if let Err(e) = self.store.finalize_execution(
                execution.id.as_str(),
                ExecutionStatus::Failed,
                None,
                Some("worker restarted, execution orphaned".to_string()),
                ExecutionUsage::default(),
                now_ms,
            ) {
                tracing::warn!(execution_id = %execution.id, error = %e, "orphan finalise failed");
            }
        }

        for session in self.store.sessions_owned_by(worker_id) {
            if let Some(pid) = session.pid {
                if pid_alive(pid) {
                    let _ = kill_process_group(pid, KillSignal::Term);
                }
            }
            let parked = if session.status == SessionStatus::Starting {
                SessionStatus::Ended
            } else if session.resume_ref.is_some() {
                // Cold resume path: the conversation can be picked up again
                SessionStatus::Idle
            } else {
                SessionStatus::Ended
            };
            if let Err(e) = self
                .store
                .transition_session(session.id.as_str(), parked, now_ms)
            {
                tracing::warn!(session_id = %session.id, error = %e, "zombie session transition failed");
            } else if parked == SessionStatus::Idle {
                let _ = self
                    .store
                    .enqueue(QueueName::RunSession, session.id.as_str(), now_ms);
            }
        }
    }

    /// Run until shutdown: heartbeat loop, stale reaper, and the polling
    /// pool on both queues.
    pub async fn run(self: Arc<Self>) {
        let heartbeat_worker = Arc::clone(&self);
        tokio::spawn(async move { heartbeat_worker.heartbeat_loop().await });

        let reaper_worker = Arc::clone(&self);
        tokio::spawn(async move { reaper_worker.reaper_loop().await });

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {}
                _ = self.wake.notified() => {}
            }
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            self.drain_queues().await;
        }
    }

    /// Claim and dispatch jobs while pool permits remain.
    async fn drain_queues(&self) {
        loop {
            let Ok(permit) = Arc::clone(&self.pool).try_acquire_owned() else {
                return;
            };

            let now_ms = self.clock.epoch_ms();
            let claimed = [QueueName::ExecuteCapability, QueueName::RunSession]
                .into_iter()
                .find_map(|queue| {
                    self.store
                        .claim_next(queue, &self.config.worker_id, now_ms)
                        .ok()
                        .flatten()
                });

            let Some(job) = claimed else {
                return;
            };

            tracing::info!(
                job_id = %job.id,
                queue = %job.queue,
                payload = %job.payload,
                "claimed job"
            );

            let runner = self.runner.clone();
            let store = self.store.clone();
            let sessions = self.sessions.clone();
            let wake = Arc::clone(&self.wake);
            tokio::spawn(async move {
                let result = match job.queue {
                    QueueName::ExecuteCapability => runner.run_execution(&job.payload).await,
                    QueueName::RunSession => {
                        let (control, commands) = SessionControl::channel(16);
                        sessions.insert(&job.payload, control.clone());
                        let result = runner.run_session(&job.payload, control, commands).await;
                        sessions.remove(&job.payload);
                        result
                    }
                };

                match result {
                    Ok(()) => {
                        if let Err(e) = store.complete_job(&job.id) {
                            tracing::warn!(job_id = %job.id, error = %e, "complete_job failed");
                        }
                    }
                    Err(e) => {
                        // Pre-finalisation failure: let the queue retry it
                        tracing::warn!(job_id = %job.id, error = %e, "handler failed, retrying");
                        let now_ms = SystemClock.epoch_ms();
                        if let Err(fail_err) = store.fail_job(&job.id, &e.to_string(), now_ms) {
                            tracing::warn!(job_id = %job.id, error = %fail_err, "fail_job failed");
                        }
                    }
                }
                drop(permit);
                wake.notify_one();
            });
        }
    }

    async fn heartbeat_loop(&self) {
        let mut tick = tokio::time::interval(self.config.heartbeat_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let running = self.config.max_concurrent_jobs - self.pool.available_permits();
            let sessions = self.sessions.len();
            if let Err(e) = self.store.worker_seen(
                &self.config.worker_id,
                self.clock.epoch_ms(),
                running.saturating_sub(sessions) as u32,
                sessions as u32,
            ) {
                tracing::warn!(error = %e, "worker heartbeat failed");
            }
        }
    }

    async fn reaper_loop(&self) {
        let mut tick = tokio::time::interval(self.config.stale_threshold / 2);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let (executions, sessions) =
                heartbeat::reap_stale(&self.store, &self.clock, self.config.stale_threshold);
            if executions + sessions > 0 {
                tracing::info!(executions, sessions, "stale reaper pass");
            }
        }
    }

    /// First step of shutdown. Synchronous: must complete before any await
    /// so child exit callbacks see the intent.
    pub fn begin_shutdown(&self) {
        self.sessions.mark_all_terminating();
        self.shutting_down.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Drain in-flight handlers, force-terminate leftovers, flush state.
    pub async fn finish_shutdown(&self) {
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while self.pool.available_permits() < self.config.max_concurrent_jobs {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("drain deadline hit, force-terminating sessions");
                self.sessions.terminate_all();
                tokio::time::sleep(Duration::from_secs(1)).await;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if let Err(e) = self.store.flush() {
            tracing::warn!(error = %e, "WAL flush on shutdown failed");
        }
        match self.store.checkpoint() {
            Ok(seq) => tracing::info!(seq, "saved shutdown snapshot"),
            Err(e) => tracing::warn!(error = %e, "shutdown checkpoint failed"),
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
