// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session runner: a run that stays alive between turns.
//!
//! A `SessionProcess` supervisor owns the session status machine, forwards
//! adapter output to the log, injects inbound and teammate messages as
//! user turns, throttles an idle timeout, and supports a permission-mode
//! change via graceful terminate-and-restart. Cancellation during the
//! restart window resolves as "terminating wins".

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agendo_adapters::{
    adapter_for, AgentAdapter, KillSignal, ManagedProcess, OutputChunk, SpawnOpts,
};
use agendo_core::{Agent, Capability, Clock, InteractionMode, LogTag, Session, SessionStatus};
use tokio::sync::mpsc;

use crate::error::RunnerError;
use crate::execution::Runner;
use crate::heartbeat::start_session_heartbeat;
use crate::logwriter::{self, ExecutionLogWriter};
use crate::{messages, safety};

/// Commands delivered to a live session supervisor.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Inject a user turn.
    UserMessage(String),
    /// Gracefully restart the adapter under a new permission mode.
    SetPermissionMode(String),
    /// Terminate the session.
    Terminate,
}

/// Handle the daemon keeps per live session.
#[derive(Clone)]
pub struct SessionControl {
    pub commands: mpsc::Sender<SessionCommand>,
    /// Set before any awaited work during worker shutdown, so the exit
    /// path knows the termination was intentional.
    pub terminating: Arc<AtomicBool>,
}

impl SessionControl {
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (tx, rx) = mpsc::channel(depth);
        (
            Self {
                commands: tx,
                terminating: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn mark_terminating(&self) {
        self.terminating.store(true, Ordering::SeqCst);
    }
}

/// How a supervised session left its loop.
enum ExitReason {
    /// Process exited on its own.
    ProcessExited,
    /// Idle timeout fired; parked for cold resume.
    Idle,
    /// Terminate command or worker shutdown.
    Terminated,
}

impl<C: Clock> Runner<C> {
    /// Run one session until it ends or parks idle.
    pub async fn run_session(
        &self,
        session_id: &str,
        control: SessionControl,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) -> Result<(), RunnerError> {
        let (session, agent, capability) = self.load_session(session_id)?;
        if session.status.is_terminal() {
            return Ok(());
        }
        // A retried claim must not double-spawn a session that is already
        // supervised somewhere
        if session.status.is_live() {
            if let Some(pid) = session.pid {
                if agendo_adapters::pid_alive(pid) {
                    tracing::info!(session_id, pid, "session already live, skipping claim");
                    return Ok(());
                }
            }
        }
        if capability.interaction_mode != InteractionMode::Prompt {
            return Err(RunnerError::Validation(format!(
                "session {session_id} requires a prompt-mode capability"
            )));
        }

        // Cold resume arrives parked at idle
        if session.status == SessionStatus::Idle {
            self.store().transition_session(
                session_id,
                SessionStatus::Starting,
                self.clock_ms(),
            )?;
        }

        let cwd = safety::validate_working_dir(
            &agent.default_working_dir,
            &self.config().allowed_working_dirs,
        )?;
        safety::validate_binary(&agent.binary_path)?;
        let env = safety::build_child_env(&agent.env_allowlist, &Default::default());

        let log_path = logwriter::log_path(
            &self.config().log_dir,
            self.clock_ms(),
            session.id.as_str(),
        );
        let mut log = ExecutionLogWriter::open(&log_path)?;

        let adapter = adapter_for(InteractionMode::Prompt, &agent.binary_basename())
            .map_err(|e| RunnerError::Validation(e.to_string()))?;

        let mut supervisor = SessionProcess {
            store: self.store().clone(),
            config: self.config().clone(),
            clock: self.clock.clone(),
            session: session.clone(),
            agent,
            adapter,
            cwd,
            env,
            log_path: log_path.clone(),
            terminating: control.terminating,
        };

        let (output_tx, output_rx) = mpsc::channel(256);
        let mut proc = supervisor
            .spawn(&session.initial_prompt, session.resume_ref.as_deref(), output_tx)
            .await?;

        self.store().start_session(
            session_id,
            &self.config().worker_id,
            proc.pid(),
            &log_path,
            self.clock_ms(),
        )?;
        let _heartbeat = start_session_heartbeat(
            self.store().clone(),
            self.clock.clone(),
            session_id.to_string(),
            self.config().heartbeat_interval,
        );
        self.store()
            .transition_session(session_id, SessionStatus::Active, self.clock_ms())?;

        let exit = supervisor
            .supervise(&mut proc, output_rx, &mut commands, &mut log)
            .await?;

        let to = match exit {
            ExitReason::Idle => SessionStatus::Idle,
            ExitReason::ProcessExited | ExitReason::Terminated => SessionStatus::Ended,
        };
        if let Err(e) = self.store().transition_session(session_id, to, self.clock_ms()) {
            // The stale reaper may have parked the row first; that wins
            tracing::info!(session_id, error = %e, "final session transition skipped");
        }

        let _ = self.store().record_task_event(agendo_core::TaskEvent {
            task_id: session.task_id.clone(),
            actor: format!("worker:{}", self.config().worker_id),
            kind: "session_finished".to_string(),
            payload: serde_json::json!({
                "session_id": session.id,
                "status": to.to_string(),
            }),
            at_ms: self.clock_ms(),
        });

        let _ = log.close();
        tracing::info!(session_id, status = %to, "session finished");
        Ok(())
    }

    fn load_session(&self, id: &str) -> Result<(Session, Agent, Capability), RunnerError> {
        self.store().read(|state| {
            let session = state
                .sessions
                .get(id)
                .cloned()
                .ok_or_else(|| RunnerError::NotFound(format!("session {id}")))?;
            let agent = state
                .agents
                .get(session.agent_id.as_str())
                .cloned()
                .ok_or_else(|| RunnerError::NotFound(format!("agent {}", session.agent_id)))?;
            let capability = state
                .capabilities
                .get(session.capability_id.as_str())
                .cloned()
                .ok_or_else(|| {
                    RunnerError::NotFound(format!("capability {}", session.capability_id))
                })?;
            Ok((session, agent, capability))
        })
    }

    fn clock_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }
}

/// Supervisor for one live session process.
struct SessionProcess<C: Clock> {
    store: agendo_storage::Store,
    config: crate::RunnerConfig,
    clock: C,
    session: Session,
    agent: Agent,
    adapter: std::sync::Arc<dyn AgentAdapter>,
    cwd: PathBuf,
    env: Vec<(String, String)>,
    log_path: PathBuf,
    terminating: Arc<AtomicBool>,
}

impl<C: Clock> SessionProcess<C> {
    fn spawn_opts(&self) -> SpawnOpts {
        SpawnOpts {
            execution_id: self.session.id.as_str().to_string(),
            binary_path: self.agent.binary_path.clone(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            extra_args: vec![],
            permission_mode: self.session.permission_mode.clone(),
            model: None,
        }
    }

    async fn spawn(
        &mut self,
        input: &str,
        resume_ref: Option<&str>,
        output_tx: mpsc::Sender<OutputChunk>,
    ) -> Result<Box<dyn ManagedProcess>, RunnerError> {
        let opts = self.spawn_opts();
        let proc = match resume_ref {
            Some(session_ref) => {
                self.adapter
                    .resume(session_ref, input, &opts, output_tx)
                    .await?
            }
            None => self.adapter.spawn(input, &opts, output_tx).await?,
        };
        Ok(proc)
    }

    /// The supervision loop: status machine, idle timer, message
    /// injection, permission-mode restarts.
    async fn supervise(
        &mut self,
        proc: &mut Box<dyn ManagedProcess>,
        mut output_rx: mpsc::Receiver<OutputChunk>,
        commands: &mut mpsc::Receiver<SessionCommand>,
        log: &mut ExecutionLogWriter,
    ) -> Result<ExitReason, RunnerError> {
        let session_id = self.session.id.as_str().to_string();
        let own_dir = messages::message_dir(&self.config.message_root, &session_id);
        let team_dir = self
            .session
            .team
            .as_ref()
            .map(|team| messages::team_dir(&self.config.message_root, team));

        let mut resume_ref_found = self.session.resume_ref.is_some();
        let mut last_activity = tokio::time::Instant::now();
        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if self.terminating.load(Ordering::SeqCst) {
                self.shutdown_process(proc, log).await?;
                return Ok(ExitReason::Terminated);
            }

            tokio::select! {
                maybe_chunk = output_rx.recv() => match maybe_chunk {
                    Some(chunk) => {
                        last_activity = tokio::time::Instant::now();
                        if !resume_ref_found {
                            if let Some(session_ref) =
                                self.adapter.extract_session_id(&chunk.text)
                            {
                                self.store
                                    .set_session_resume_ref(&session_id, &session_ref)?;
                                self.session.resume_ref = Some(session_ref);
                                resume_ref_found = true;
                            }
                        }
                        log.write(chunk.tag, &chunk.text)?;
                        if turn_finished(&chunk) {
                            let _ = self.store.transition_session(
                                &session_id,
                                SessionStatus::AwaitingInput,
                                self.clock.epoch_ms(),
                            );
                        }
                    }
                    None => return Ok(ExitReason::ProcessExited),
                },

                maybe_command = commands.recv() => match maybe_command {
                    Some(SessionCommand::UserMessage(text)) => {
                        last_activity = tokio::time::Instant::now();
                        let _ = self.store.transition_session(
                            &session_id,
                            SessionStatus::Active,
                            self.clock.epoch_ms(),
                        );
                        self.forward_message(proc, log, &text).await?;
                    }
                    Some(SessionCommand::SetPermissionMode(mode)) => {
                        last_activity = tokio::time::Instant::now();
                        log.write(
                            LogTag::System,
                            &format!("Permission mode change to {mode}; restarting"),
                        )?;
                        self.store.set_session_permission_mode(&session_id, &mode)?;
                        self.session.permission_mode = Some(mode);

                        self.shutdown_process(proc, log).await?;
                        if self.terminating.load(Ordering::SeqCst) {
                            // Cancellation during the restart window:
                            // terminating wins
                            return Ok(ExitReason::Terminated);
                        }

                        let (new_tx, new_rx) = mpsc::channel(256);
                        let resume = self.session.resume_ref.clone();
                        *proc = self
                            .spawn("Continuing after permission mode change.", resume.as_deref(), new_tx)
                            .await?;
                        output_rx = new_rx;
                        self.store.start_session(
                            &session_id,
                            &self.config.worker_id,
                            proc.pid(),
                            &self.log_path,
                            self.clock.epoch_ms(),
                        )?;
                    }
                    Some(SessionCommand::Terminate) | None => {
                        self.shutdown_process(proc, log).await?;
                        return Ok(ExitReason::Terminated);
                    }
                },

                _ = tick.tick() => {
                    // Messages dropped while no supervisor was live (cold
                    // resume) arrive through the filesystem channel
                    if let Ok(Some(text)) = messages::take_next(&own_dir) {
                        last_activity = tokio::time::Instant::now();
                        let _ = self.store.transition_session(
                            &session_id,
                            SessionStatus::Active,
                            self.clock.epoch_ms(),
                        );
                        self.forward_message(proc, log, &text).await?;
                    }

                    // Teammate messages are injected as synthetic user turns
                    if let Some(dir) = &team_dir {
                        if let Ok(Some(text)) = messages::take_next(dir) {
                            last_activity = tokio::time::Instant::now();
                            self.forward_message(proc, log, &text).await?;
                        }
                    }

                    if last_activity.elapsed() >= self.config.session_idle_timeout {
                        log.write(LogTag::System, "Idle timeout. Parking session.")?;
                        self.shutdown_process(proc, log).await?;
                        return Ok(ExitReason::Idle);
                    }
                }
            }
        }
    }

    /// Forward one user turn with a bounded write; a wedged stdin must
    /// not stall the supervision loop.
    async fn forward_message(
        &self,
        proc: &mut Box<dyn ManagedProcess>,
        log: &mut ExecutionLogWriter,
        text: &str,
    ) -> Result<(), RunnerError> {
        log.write(LogTag::User, text)?;
        match tokio::time::timeout(self.config.grace_period, proc.send_message(text)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => log
                .write(LogTag::System, &format!("Message not delivered: {e}"))
                .map_err(RunnerError::from),
            Err(_) => log
                .write(LogTag::System, "Message not delivered: child stdin stalled")
                .map_err(RunnerError::from),
        }
    }

    /// Graceful terminate: SIGTERM, grace wait, SIGKILL.
    async fn shutdown_process(
        &self,
        proc: &mut Box<dyn ManagedProcess>,
        log: &mut ExecutionLogWriter,
    ) -> Result<(), RunnerError> {
        let _ = proc.kill(KillSignal::Term);
        if tokio::time::timeout(self.config.grace_period, proc.wait())
            .await
            .is_err()
        {
            log.write(LogTag::System, "Grace period expired.")?;
            let _ = proc.kill(KillSignal::Kill);
            let _ = tokio::time::timeout(self.config.grace_period, proc.wait()).await;
        }
        Ok(())
    }
}

/// A Claude-style `result` record closes the turn.
fn turn_finished(chunk: &OutputChunk) -> bool {
    if chunk.tag != LogTag::Stdout {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(chunk.text.trim())
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "result"))
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
