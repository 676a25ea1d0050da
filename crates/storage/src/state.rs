// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state derived from the event stream.
//!
//! Events are facts about what happened; this state is a pure fold over
//! them. **All handlers MUST be idempotent**: applying the same event twice
//! must leave the same state as applying it once, so a replayed tail after
//! an imperfect shutdown is harmless. Prefer assignment over mutation and
//! guard list appends and counters with existence/status checks.

use agendo_core::{
    Agent, Capability, Event, Execution, ExecutionStatus, QueueJob, QueueJobStatus, Session,
    SessionStatus, Task, TaskEvent, WorkerRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Materialized state built from event replay.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    #[serde(default)]
    pub agents: HashMap<String, Agent>,
    #[serde(default)]
    pub capabilities: HashMap<String, Capability>,
    #[serde(default)]
    pub tasks: HashMap<String, Task>,
    /// Append-only audit trail, per task.
    #[serde(default)]
    pub task_events: HashMap<String, Vec<TaskEvent>>,
    #[serde(default)]
    pub executions: HashMap<String, Execution>,
    #[serde(default)]
    pub sessions: HashMap<String, Session>,
    #[serde(default)]
    pub queue_jobs: HashMap<String, QueueJob>,
    #[serde(default)]
    pub workers: HashMap<String, WorkerRecord>,
}

impl MaterializedState {
    /// Get an execution by ID or unique prefix (like git commit hashes).
    pub fn get_execution(&self, id: &str) -> Option<&Execution> {
        get_by_prefix(&self.executions, id)
    }

    /// Get a session by ID or unique prefix.
    pub fn get_session(&self, id: &str) -> Option<&Session> {
        get_by_prefix(&self.sessions, id)
    }

    /// Count executions holding a concurrency slot for an agent
    /// (queued, running, or cancelling).
    pub fn agent_load(&self, agent_id: &str) -> u32 {
        self.executions
            .values()
            .filter(|e| {
                e.agent_id.as_str() == agent_id
                    && matches!(
                        e.status,
                        ExecutionStatus::Queued
                            | ExecutionStatus::Running
                            | ExecutionStatus::Cancelling
                    )
            })
            .count() as u32
    }

    /// Apply an event to derive state changes. Idempotent (see module docs).
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::AgentRegistered { agent } => {
                self.agents.insert(agent.id.as_str().to_string(), agent.clone());
            }

            Event::CapabilityRegistered { capability } => {
                self.capabilities
                    .insert(capability.id.as_str().to_string(), capability.clone());
            }

            Event::TaskCreated { task } => {
                self.tasks.insert(task.id.as_str().to_string(), task.clone());
            }

            Event::TaskStatusChanged { id, to } => {
                if let Some(task) = self.tasks.get_mut(id.as_str()) {
                    task.status = *to;
                }
            }

            Event::TaskEventRecorded { entry } => {
                let list = self
                    .task_events
                    .entry(entry.task_id.as_str().to_string())
                    .or_default();
                if !list.contains(entry) {
                    list.push(entry.clone());
                }
            }

            Event::JobEnqueued { job } => {
                self.queue_jobs
                    .entry(job.id.as_str().to_string())
                    .or_insert_with(|| job.clone());
            }

            Event::JobClaimed {
                id,
                worker_id,
                expires_at_ms,
            } => {
                if let Some(job) = self.queue_jobs.get_mut(id.as_str()) {
                    job.status = QueueJobStatus::Active;
                    job.claimed_by = Some(worker_id.clone());
                    job.expires_at_ms = Some(*expires_at_ms);
                }
            }

            Event::JobCompleted { id } => {
                if let Some(job) = self.queue_jobs.get_mut(id.as_str()) {
                    job.status = QueueJobStatus::Completed;
                    job.expires_at_ms = None;
                }
            }

            Event::JobFailed {
                id, retry_at_ms, ..
            } => {
                if let Some(job) = self.queue_jobs.get_mut(id.as_str()) {
                    // Guarded increment keeps a double-apply from burning
                    // an extra attempt.
                    if job.status == QueueJobStatus::Active {
                        job.attempts += 1;
                    }
                    job.claimed_by = None;
                    job.expires_at_ms = None;
                    match retry_at_ms {
                        Some(at) => {
                            job.status = QueueJobStatus::Pending;
                            job.available_at_ms = *at;
                        }
                        None => job.status = QueueJobStatus::Dead,
                    }
                }
            }

            Event::ExecutionCreated { execution } => {
                self.executions
                    .entry(execution.id.as_str().to_string())
                    .or_insert_with(|| execution.clone());
            }

            Event::ExecutionStarted {
                id,
                worker_id,
                started_at_ms,
                log_path,
            } => {
                if let Some(exec) = self.executions.get_mut(id.as_str()) {
                    exec.status = ExecutionStatus::Running;
                    exec.worker_id = Some(worker_id.clone());
                    exec.log_path = Some(log_path.clone());
                    exec.heartbeat_at_ms = Some(*started_at_ms);
                    // Keep the first start time across claim retries
                    if exec.started_at_ms.is_none() {
                        exec.started_at_ms = Some(*started_at_ms);
                    }
                }
            }

            Event::ExecutionPidAssigned {
                id,
                pid,
                tmux_session,
            } => {
                if let Some(exec) = self.executions.get_mut(id.as_str()) {
                    exec.pid = Some(*pid);
                    exec.tmux_session = tmux_session.clone();
                }
            }

            Event::ExecutionPromptResolved { id, prompt } => {
                if let Some(exec) = self.executions.get_mut(id.as_str()) {
                    exec.prompt = Some(prompt.clone());
                }
            }

            Event::ExecutionHeartbeat { id, at_ms } => {
                if let Some(exec) = self.executions.get_mut(id.as_str()) {
                    if !exec.is_terminal() {
                        exec.heartbeat_at_ms = Some(*at_ms);
                    }
                }
            }

            Event::ExecutionSessionRef { id, session_ref } => {
                if let Some(exec) = self.executions.get_mut(id.as_str()) {
                    // First extraction wins
                    if exec.session_ref.is_none() {
                        exec.session_ref = Some(session_ref.clone());
                    }
                }
            }

            Event::ExecutionLogStats {
                id,
                byte_size,
                line_count,
            } => {
                if let Some(exec) = self.executions.get_mut(id.as_str()) {
                    exec.log_byte_size = *byte_size;
                    exec.log_line_count = *line_count;
                }
            }

            Event::ExecutionCancelRequested { id, at_ms } => {
                if let Some(exec) = self.executions.get_mut(id.as_str()) {
                    match exec.status {
                        ExecutionStatus::Queued => {
                            exec.status = ExecutionStatus::Cancelled;
                            exec.ended_at_ms = Some(*at_ms);
                            exec.reason = Some("cancelled before start".to_string());
                        }
                        ExecutionStatus::Running => {
                            exec.status = ExecutionStatus::Cancelling;
                        }
                        _ => {}
                    }
                }
            }

            Event::ExecutionFinished {
                id,
                status,
                exit_code,
                reason,
                ended_at_ms,
                usage,
            } => {
                if let Some(exec) = self.executions.get_mut(id.as_str()) {
                    exec.status = *status;
                    exec.exit_code = *exit_code;
                    exec.ended_at_ms = Some(*ended_at_ms);
                    if reason.is_some() {
                        exec.reason = reason.clone();
                    }
                    if !usage.is_empty() {
                        exec.usage = usage.clone();
                    }
                }
            }

            Event::SessionCreated { session } => {
                self.sessions
                    .entry(session.id.as_str().to_string())
                    .or_insert_with(|| session.clone());
            }

            Event::SessionStarted {
                id,
                worker_id,
                pid,
                log_path,
                at_ms,
            } => {
                if let Some(session) = self.sessions.get_mut(id.as_str()) {
                    session.worker_id = Some(worker_id.clone());
                    session.pid = Some(*pid);
                    session.log_path = Some(log_path.clone());
                    session.heartbeat_at_ms = Some(*at_ms);
                }
            }

            Event::SessionStatusChanged { id, to, at_ms } => {
                if let Some(session) = self.sessions.get_mut(id.as_str()) {
                    session.status = *to;
                    if *to == SessionStatus::Ended {
                        session.ended_at_ms = Some(*at_ms);
                    }
                }
            }

            Event::SessionResumeRef { id, resume_ref } => {
                if let Some(session) = self.sessions.get_mut(id.as_str()) {
                    if session.resume_ref.is_none() {
                        session.resume_ref = Some(resume_ref.clone());
                    }
                }
            }

            Event::SessionPermissionMode { id, mode } => {
                if let Some(session) = self.sessions.get_mut(id.as_str()) {
                    session.permission_mode = Some(mode.clone());
                }
            }

            Event::SessionHeartbeat { id, at_ms } => {
                if let Some(session) = self.sessions.get_mut(id.as_str()) {
                    if !session.status.is_terminal() {
                        session.heartbeat_at_ms = Some(*at_ms);
                    }
                }
            }

            Event::WorkerSeen {
                id,
                at_ms,
                running_executions,
                running_sessions,
            } => {
                let record = self
                    .workers
                    .entry(id.as_str().to_string())
                    .or_insert_with(|| WorkerRecord {
                        id: id.clone(),
                        last_seen_at_ms: 0,
                        running_executions: 0,
                        running_sessions: 0,
                    });
                record.last_seen_at_ms = *at_ms;
                record.running_executions = *running_executions;
                record.running_sessions = *running_sessions;
            }
        }
    }
}

/// Exact match first, then unambiguous prefix match.
fn get_by_prefix<'a, T>(map: &'a HashMap<String, T>, id: &str) -> Option<&'a T> {
    if let Some(value) = map.get(id) {
        return Some(value);
    }

    let mut matches = map.iter().filter(|(k, _)| k.starts_with(id));
    match (matches.next(), matches.next()) {
        (Some((_, value)), None) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
