// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The execution runner: one complete capability run, from claim to
//! race-guarded finalisation.

use std::path::PathBuf;
use std::time::Duration;

use agendo_adapters::{adapter_for, KillSignal, ManagedProcess, OutputChunk, SpawnOpts};
use agendo_core::{
    Agent, Capability, Clock, Execution, ExecutionStatus, InteractionMode, LogTag, Task, TaskEvent,
};
use agendo_storage::{FinalizeOutcome, Store};
use tokio::sync::mpsc;

use crate::error::RunnerError;
use crate::heartbeat::start_execution_heartbeat;
use crate::logwriter::{self, ExecutionLogWriter};
use crate::{messages, prompt, safety, usage, RunnerConfig};

/// Output channel depth; deep enough that a bursty child never stalls on
/// the runner's log writes.
const OUTPUT_CHANNEL_DEPTH: usize = 256;

/// The per-run orchestrator.
#[derive(Clone)]
pub struct Runner<C: Clock> {
    pub(crate) store: Store,
    pub(crate) config: RunnerConfig,
    pub(crate) clock: C,
}

/// Everything resolved before the child is spawned.
struct Prepared {
    cwd: PathBuf,
    env: Vec<(String, String)>,
    /// Prompt text (prompt mode) or the substituted command line
    /// (template mode).
    input: String,
    binary_path: PathBuf,
}

impl<C: Clock> Runner<C> {
    pub fn new(store: Store, config: RunnerConfig, clock: C) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one execution to its terminal status.
    ///
    /// Deterministic rejections (safety, validation) finalise the record
    /// as `failed` and return `Ok`; there is nothing to retry. Errors
    /// before the spawn propagate so the queue can retry; errors after
    /// finalisation are swallowed by the caller.
    pub async fn run_execution(&self, execution_id: &str) -> Result<(), RunnerError> {
        let (execution, agent, capability, task) = self.load(execution_id)?;
        if execution.is_terminal() {
            tracing::info!(execution_id, status = %execution.status, "already terminal, skipping");
            return Ok(());
        }

        let log_path = logwriter::log_path(
            &self.config.log_dir,
            self.clock.epoch_ms(),
            execution.id.as_str(),
        );

        let prepared = match self.prepare(&execution, &agent, &capability, &task) {
            Ok(prepared) => prepared,
            Err(e) if e.is_deterministic() => {
                tracing::warn!(execution_id, error = %e, "rejected before spawn");
                self.finalize_rejected(execution_id, &log_path, &e.to_string())?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if execution.mode == InteractionMode::Prompt {
            self.store
                .resolve_execution_prompt(execution_id, &prepared.input)?;
        }

        // Transition to running; a conflict means another worker owns it
        let execution = match self.store.start_execution(
            execution_id,
            &self.config.worker_id,
            &log_path,
            self.clock.epoch_ms(),
        ) {
            Ok(execution) => execution,
            Err(agendo_storage::StoreError::Conflict(msg)) => {
                tracing::info!(execution_id, %msg, "not claimable, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut log = ExecutionLogWriter::open(&log_path)?;
        let _heartbeat = start_execution_heartbeat(
            self.store.clone(),
            self.clock.clone(),
            execution_id.to_string(),
            self.config.heartbeat_interval,
        );

        let outcome = self
            .supervise(&execution, &capability, prepared, &mut log)
            .await?;

        let final_usage = usage::scan_log(&log_path);
        let finalize = self.store.finalize_execution(
            execution_id,
            outcome.status,
            outcome.exit_code,
            outcome.reason.clone(),
            final_usage,
            self.clock.epoch_ms(),
        )?;

        let final_status = match finalize {
            FinalizeOutcome::Finalized(status) => status,
            FinalizeOutcome::CancelledInstead => ExecutionStatus::Cancelled,
            FinalizeOutcome::AlreadyTerminal(status) => status,
        };
        if final_status != ExecutionStatus::Succeeded {
            let detail = outcome
                .reason
                .clone()
                .unwrap_or_else(|| final_status.to_string());
            let _ = log.write(LogTag::System, &format!("Execution {final_status}: {detail}"));
        }
        let (bytes, lines) = log.close()?;
        self.store
            .set_execution_log_stats(execution_id, bytes, lines)?;

        self.store.record_task_event(TaskEvent {
            task_id: execution.task_id.clone(),
            actor: format!("worker:{}", self.config.worker_id),
            kind: "execution_finished".to_string(),
            payload: serde_json::json!({
                "execution_id": execution.id,
                "status": final_status.to_string(),
            }),
            at_ms: self.clock.epoch_ms(),
        })?;

        tracing::info!(execution_id, status = %final_status, "execution finished");
        Ok(())
    }

    fn load(
        &self,
        execution_id: &str,
    ) -> Result<(Execution, Agent, Capability, Task), RunnerError> {
        self.store.read(|state| {
            let execution = state
                .executions
                .get(execution_id)
                .cloned()
                .ok_or_else(|| RunnerError::NotFound(format!("execution {execution_id}")))?;
            let agent = state
                .agents
                .get(execution.agent_id.as_str())
                .cloned()
                .ok_or_else(|| RunnerError::NotFound(format!("agent {}", execution.agent_id)))?;
            let capability = state
                .capabilities
                .get(execution.capability_id.as_str())
                .cloned()
                .ok_or_else(|| {
                    RunnerError::NotFound(format!("capability {}", execution.capability_id))
                })?;
            let task = state
                .tasks
                .get(execution.task_id.as_str())
                .cloned()
                .ok_or_else(|| RunnerError::NotFound(format!("task {}", execution.task_id)))?;
            Ok((execution, agent, capability, task))
        })
    }

    /// Safety checks and payload resolution, all before any process
    /// exists.
    fn prepare(
        &self,
        execution: &Execution,
        agent: &Agent,
        capability: &Capability,
        task: &Task,
    ) -> Result<Prepared, RunnerError> {
        let requested_cwd = task
            .input_context
            .working_dir
            .clone()
            .unwrap_or_else(|| agent.default_working_dir.clone());
        let cwd =
            safety::validate_working_dir(&requested_cwd, &self.config.allowed_working_dirs)?;

        safety::validate_args(&capability.args_schema, &execution.args)?;

        let env = safety::build_child_env(&agent.env_allowlist, &task.input_context.env);

        match execution.mode {
            InteractionMode::Prompt => {
                safety::validate_binary(&agent.binary_path)?;
                let template = capability.prompt_template.as_deref().ok_or_else(|| {
                    RunnerError::Validation(format!(
                        "capability {} has no prompt template",
                        capability.id
                    ))
                })?;
                let input = prompt::resolve_prompt(template, task, &execution.args);
                Ok(Prepared {
                    cwd,
                    env,
                    input,
                    binary_path: agent.binary_path.clone(),
                })
            }
            InteractionMode::Template => {
                let argv = safety::build_command_args(&capability.command_tokens, &execution.args)?;
                let binary = argv.first().cloned().ok_or_else(|| {
                    RunnerError::Validation(format!(
                        "capability {} has no command tokens",
                        capability.id
                    ))
                })?;
                if binary.contains('/') {
                    safety::validate_binary(std::path::Path::new(&binary))?;
                }
                Ok(Prepared {
                    cwd,
                    env,
                    input: argv.join(" "),
                    binary_path: PathBuf::from(binary),
                })
            }
        }
    }

    /// Spawn the child and supervise it to exit: forward output to the
    /// log, extract the session id, enforce the output limit and timeout,
    /// poll for inbound messages and cancellation.
    async fn supervise(
        &self,
        execution: &Execution,
        capability: &Capability,
        prepared: Prepared,
        log: &mut ExecutionLogWriter,
    ) -> Result<RunOutcome, RunnerError> {
        let execution_id = execution.id.as_str();
        let adapter = adapter_for(execution.mode, &agent_basename(&prepared.binary_path))
            .map_err(|e| RunnerError::Validation(e.to_string()))?;

        let opts = SpawnOpts {
            execution_id: execution_id.to_string(),
            binary_path: prepared.binary_path.clone(),
            cwd: prepared.cwd.clone(),
            env: prepared.env.clone(),
            extra_args: execution.cli_flags.clone(),
            permission_mode: None,
            model: None,
        };

        let (output_tx, mut output_rx) = mpsc::channel::<OutputChunk>(OUTPUT_CHANNEL_DEPTH);

        let resume_ref = execution
            .parent_execution_id
            .as_ref()
            .and(execution.session_ref.as_deref());
        let mut proc: Box<dyn ManagedProcess> = match resume_ref {
            Some(session_ref) => {
                log.write(LogTag::System, &format!("Resuming session: {session_ref}"))?;
                adapter
                    .resume(session_ref, &prepared.input, &opts, output_tx)
                    .await?
            }
            None => adapter.spawn(&prepared.input, &opts, output_tx).await?,
        };

        self.store.assign_execution_pid(
            execution_id,
            proc.pid(),
            proc.tmux_session().map(str::to_string),
        )?;

        let timeout = Duration::from_secs(capability.timeout_sec);
        let max_output_bytes = capability.max_output_bytes;
        let message_dir = messages::message_dir(&self.config.message_root, execution_id);

        let mut session_ref_found = execution.session_ref.is_some();
        let mut timed_out = false;
        let mut limit_exceeded = false;
        let mut cancel_seen = false;
        let mut grace_deadline: Option<tokio::time::Instant> = None;

        let timeout_sleep = tokio::time::sleep(timeout);
        tokio::pin!(timeout_sleep);
        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_chunk = output_rx.recv() => match maybe_chunk {
                    Some(chunk) => {
                        if !session_ref_found {
                            if let Some(session_ref) = adapter.extract_session_id(&chunk.text) {
                                self.store
                                    .set_execution_session_ref(execution_id, &session_ref)?;
                                session_ref_found = true;
                            }
                        }
                        if limit_exceeded && chunk.tag != LogTag::System {
                            continue;
                        }
                        log.write(chunk.tag, &chunk.text)?;
                        if let Some((bytes, lines)) = log.stats_if_due() {
                            self.store
                                .set_execution_log_stats(execution_id, bytes, lines)?;
                        }
                        if !limit_exceeded && log.byte_size() > max_output_bytes {
                            limit_exceeded = true;
                            log.write(LogTag::System, "Output limit exceeded. Terminating.")?;
                            let _ = proc.kill(KillSignal::Term);
                            grace_deadline =
                                Some(tokio::time::Instant::now() + self.config.grace_period);
                        }
                    }
                    // Pipes closed: the child is gone (or abandoned its stdio)
                    None => break,
                },

                () = &mut timeout_sleep, if !timed_out => {
                    timed_out = true;
                    log.write(
                        LogTag::System,
                        &format!(
                            "Timeout after {}s. Sending SIGTERM.",
                            capability.timeout_sec
                        ),
                    )?;
                    let _ = proc.kill(KillSignal::Term);
                    grace_deadline = Some(tokio::time::Instant::now() + self.config.grace_period);
                }

                _ = tick.tick() => {
                    // One inbound message at a time; a wedged stdin must
                    // not stall the supervision loop
                    match messages::take_next(&message_dir) {
                        Ok(Some(text)) => {
                            log.write(LogTag::User, &text)?;
                            let send = tokio::time::timeout(
                                self.config.grace_period,
                                proc.send_message(&text),
                            );
                            match send.await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => {
                                    log.write(
                                        LogTag::System,
                                        &format!("Message not delivered: {e}"),
                                    )?;
                                }
                                Err(_) => {
                                    log.write(
                                        LogTag::System,
                                        "Message not delivered: child stdin stalled",
                                    )?;
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(execution_id, error = %e, "message poll failed");
                        }
                    }

                    // Two-phase cancellation: the API parked the row at
                    // cancelling; the runner delivers the signals
                    if !cancel_seen {
                        let status = self
                            .store
                            .read(|s| s.executions.get(execution_id).map(|e| e.status));
                        if status == Some(ExecutionStatus::Cancelling) {
                            cancel_seen = true;
                            log.write(
                                LogTag::System,
                                "Cancellation requested. Sending SIGTERM.",
                            )?;
                            let _ = proc.kill(KillSignal::Term);
                            grace_deadline =
                                Some(tokio::time::Instant::now() + self.config.grace_period);
                        }
                    }

                    if let Some(deadline) = grace_deadline {
                        if tokio::time::Instant::now() >= deadline {
                            grace_deadline = None;
                            log.write(LogTag::System, "Grace period expired.")?;
                            let _ = proc.kill(KillSignal::Kill);
                        }
                    }
                }
            }
        }

        // The output channel closed; collect the exit code, escalating if
        // the child detached from its pipes without exiting
        let exit_code = match tokio::time::timeout(self.config.grace_period, proc.wait()).await {
            Ok(code) => code,
            Err(_) => {
                let _ = proc.kill(KillSignal::Kill);
                tokio::time::timeout(self.config.grace_period, proc.wait())
                    .await
                    .unwrap_or(None)
            }
        };

        let (status, reason) = if limit_exceeded {
            (
                ExecutionStatus::Failed,
                Some("output limit exceeded".to_string()),
            )
        } else {
            match exit_code {
                Some(0) => (ExecutionStatus::Succeeded, None),
                Some(code) => (ExecutionStatus::Failed, Some(format!("exit code {code}"))),
                None => (
                    ExecutionStatus::TimedOut,
                    Some(if timed_out {
                        format!("timeout after {}s", capability.timeout_sec)
                    } else {
                        "killed before exit".to_string()
                    }),
                ),
            }
        };

        Ok(RunOutcome {
            status,
            exit_code,
            reason,
        })
    }

    /// Deterministic rejection: give the record a terminal status and a
    /// reason instead of burning queue retries on an outcome that cannot
    /// change.
    fn finalize_rejected(
        &self,
        execution_id: &str,
        log_path: &std::path::Path,
        reason: &str,
    ) -> Result<(), RunnerError> {
        if self
            .store
            .start_execution(
                execution_id,
                &self.config.worker_id,
                log_path,
                self.clock.epoch_ms(),
            )
            .is_err()
        {
            return Ok(());
        }

        if let Ok(mut log) = ExecutionLogWriter::open(log_path) {
            let _ = log.write(LogTag::System, reason);
            if let Ok((bytes, lines)) = log.close() {
                let _ = self
                    .store
                    .set_execution_log_stats(execution_id, bytes, lines);
            }
        }
        self.store.finalize_execution(
            execution_id,
            ExecutionStatus::Failed,
            None,
            Some(reason.to_string()),
            Default::default(),
            self.clock.epoch_ms(),
        )?;
        Ok(())
    }
}

struct RunOutcome {
    status: ExecutionStatus,
    exit_code: Option<i32>,
    reason: Option<String>,
}

fn agent_basename(binary_path: &std::path::Path) -> String {
    binary_path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "execution_tests.rs"]
mod tests;
