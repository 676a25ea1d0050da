// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable store: materialized state + WAL behind one lock.
//!
//! Every mutation is a guarded transition executed while holding the state
//! lock: check the current status, apply the event to memory, append it to
//! the WAL, release. That check-and-apply is the compare-and-swap this
//! system is built on; it replaces the `UPDATE … WHERE status IN (…)`
//! guards a SQL rendition would use, and makes it impossible for the runner
//! to clobber a concurrent cancellation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agendo_core::{
    Event, Execution, ExecutionStatus, ExecutionUsage, Session, SessionStatus, Task, TaskEvent,
    TaskStatus, WorkerId,
};
use agendo_core::{Agent, Capability, CoreError};
use parking_lot::Mutex;
use thiserror::Error;

use crate::snapshot::{Snapshot, SnapshotError};
use crate::state::MaterializedState;
use crate::wal::{Wal, WalError};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => CoreError::NotFound(msg),
            StoreError::Conflict(msg) => CoreError::Conflict(msg),
            StoreError::Validation(msg) => CoreError::Validation(msg),
            StoreError::Wal(e) => CoreError::Internal(e.to_string()),
            StoreError::Snapshot(e) => CoreError::Internal(e.to_string()),
        }
    }
}

/// What the race-guarded finalisation actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The guard matched `running`; the requested status was written.
    Finalized(ExecutionStatus),
    /// The row was `cancelling`; it was finalised to `cancelled` instead.
    CancelledInstead,
    /// The row was already terminal; nothing was written.
    AlreadyTerminal(ExecutionStatus),
}

pub(crate) struct Inner {
    pub state: MaterializedState,
    pub wal: Wal,
}

/// Handle to the durable store. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<Mutex<Inner>>,
    snapshot_path: PathBuf,
}

impl Store {
    /// Open the store: load the snapshot (if any), replay the WAL tail.
    pub fn open(wal_path: &Path, snapshot_path: &Path) -> Result<Self, StoreError> {
        let snapshot = Snapshot::load(snapshot_path)?;
        let (seq, mut state) = match snapshot {
            Some(snap) => (snap.seq, snap.state),
            None => (0, MaterializedState::default()),
        };

        let (wal, tail) = Wal::open(wal_path, seq)?;
        for entry in &tail {
            state.apply_event(&entry.event);
        }
        if !tail.is_empty() {
            tracing::info!(replayed = tail.len(), "replayed WAL tail");
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { state, wal })),
            snapshot_path: snapshot_path.to_owned(),
        })
    }

    /// Run a read-only closure against the state.
    pub fn read<R>(&self, f: impl FnOnce(&MaterializedState) -> R) -> R {
        f(&self.inner.lock().state)
    }

    /// Apply an event and append it to the WAL, atomically.
    pub(crate) fn emit(&self, event: Event) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        emit_locked(&mut inner, event)
    }

    /// Flush the WAL if the group-commit window has elapsed.
    pub fn flush_if_needed(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.wal.needs_flush() {
            inner.wal.flush()?;
        }
        Ok(())
    }

    /// Flush the WAL unconditionally (shutdown path).
    pub fn flush(&self) -> Result<(), StoreError> {
        Ok(self.inner.lock().wal.flush()?)
    }

    /// Save a durable snapshot of the current state and drop the WAL prefix
    /// it covers. The snapshot write happens outside the lock.
    pub fn checkpoint(&self) -> Result<u64, StoreError> {
        let (seq, state) = {
            let mut inner = self.inner.lock();
            inner.wal.flush()?;
            (inner.wal.write_seq(), inner.state.clone())
        };

        Snapshot::new(seq, state).save(&self.snapshot_path)?;

        // Snapshot is durable; the covered WAL prefix is now redundant
        self.inner.lock().wal.truncate_through(seq)?;
        Ok(seq)
    }

    // === registry ===

    pub fn register_agent(&self, agent: Agent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.state.agents.contains_key(agent.id.as_str()) {
            return Err(StoreError::Conflict(format!(
                "agent already registered: {}",
                agent.id
            )));
        }
        emit_locked(&mut inner, Event::AgentRegistered { agent })
    }

    pub fn register_capability(&self, capability: Capability) -> Result<(), StoreError> {
        if !capability.payload_consistent() {
            return Err(StoreError::Validation(format!(
                "capability {} payload does not match its interaction mode",
                capability.id
            )));
        }
        let mut inner = self.inner.lock();
        if !inner
            .state
            .agents
            .contains_key(capability.agent_id.as_str())
        {
            return Err(StoreError::NotFound(format!(
                "agent not found: {}",
                capability.agent_id
            )));
        }
        if inner
            .state
            .capabilities
            .contains_key(capability.id.as_str())
        {
            return Err(StoreError::Conflict(format!(
                "capability already registered: {}",
                capability.id
            )));
        }
        emit_locked(&mut inner, Event::CapabilityRegistered { capability })
    }

    pub fn create_task(&self, task: Task) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.state.tasks.contains_key(task.id.as_str()) {
            return Err(StoreError::Conflict(format!(
                "task already exists: {}",
                task.id
            )));
        }
        emit_locked(&mut inner, Event::TaskCreated { task })
    }

    /// Transition a task, enforcing the task state machine.
    pub fn transition_task(&self, id: &str, to: TaskStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let task = inner
            .state
            .tasks
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("task not found: {id}")))?;
        if task.status == to {
            return Ok(());
        }
        if !task.status.can_transition(to) {
            return Err(StoreError::Conflict(format!(
                "task {id}: illegal transition {} → {to}",
                task.status
            )));
        }
        let id = task.id.clone();
        emit_locked(&mut inner, Event::TaskStatusChanged { id, to })
    }

    pub fn record_task_event(&self, entry: TaskEvent) -> Result<(), StoreError> {
        self.emit(Event::TaskEventRecorded { entry })
    }

    // === executions ===

    /// Insert a new execution in `queued`. The per-agent concurrency check
    /// happens here, under the same lock as the insert.
    pub fn create_execution(&self, execution: Execution) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.state.executions.contains_key(execution.id.as_str()) {
            return Err(StoreError::Conflict(format!(
                "execution already exists: {}",
                execution.id
            )));
        }
        let agent = inner
            .state
            .agents
            .get(execution.agent_id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("agent not found: {}", execution.agent_id)))?;
        if inner.state.agent_load(execution.agent_id.as_str()) >= agent.max_concurrent {
            return Err(StoreError::Conflict(format!(
                "agent {} is at its concurrency cap ({})",
                execution.agent_id, agent.max_concurrent
            )));
        }
        emit_locked(&mut inner, Event::ExecutionCreated { execution })
    }

    /// Claim an execution for a worker and mark it running.
    ///
    /// Guard: `queued`, or `running` already stamped with the same worker id
    /// (a queue retry re-claiming its own half-started run).
    pub fn start_execution(
        &self,
        id: &str,
        worker_id: &WorkerId,
        log_path: &Path,
        now_ms: u64,
    ) -> Result<Execution, StoreError> {
        let mut inner = self.inner.lock();
        let exec = get_execution(&inner.state, id)?;
        let reclaim = exec.status == ExecutionStatus::Running
            && exec.worker_id.as_ref() == Some(worker_id);
        if exec.status != ExecutionStatus::Queued && !reclaim {
            return Err(StoreError::Conflict(format!(
                "execution {id} is {}, not claimable",
                exec.status
            )));
        }
        let event = Event::ExecutionStarted {
            id: exec.id.clone(),
            worker_id: worker_id.clone(),
            started_at_ms: now_ms,
            log_path: log_path.to_owned(),
        };
        emit_locked(&mut inner, event)?;
        get_execution(&inner.state, id).map(Execution::clone)
    }

    pub fn assign_execution_pid(
        &self,
        id: &str,
        pid: u32,
        tmux_session: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let exec = get_execution(&inner.state, id)?;
        let event = Event::ExecutionPidAssigned {
            id: exec.id.clone(),
            pid,
            tmux_session,
        };
        emit_locked(&mut inner, event)
    }

    pub fn resolve_execution_prompt(&self, id: &str, prompt: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let exec = get_execution(&inner.state, id)?;
        let event = Event::ExecutionPromptResolved {
            id: exec.id.clone(),
            prompt: prompt.to_string(),
        };
        emit_locked(&mut inner, event)
    }

    pub fn execution_heartbeat(&self, id: &str, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let exec = get_execution(&inner.state, id)?;
        if exec.is_terminal() {
            return Ok(());
        }
        let event = Event::ExecutionHeartbeat {
            id: exec.id.clone(),
            at_ms: now_ms,
        };
        emit_locked(&mut inner, event)
    }

    /// Store the session reference once. Later extractions are ignored.
    pub fn set_execution_session_ref(&self, id: &str, session_ref: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let exec = get_execution(&inner.state, id)?;
        if exec.session_ref.is_some() {
            return Ok(());
        }
        let event = Event::ExecutionSessionRef {
            id: exec.id.clone(),
            session_ref: session_ref.to_string(),
        };
        emit_locked(&mut inner, event)
    }

    pub fn set_execution_log_stats(
        &self,
        id: &str,
        byte_size: u64,
        line_count: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let exec = get_execution(&inner.state, id)?;
        let event = Event::ExecutionLogStats {
            id: exec.id.clone(),
            byte_size,
            line_count,
        };
        emit_locked(&mut inner, event)
    }

    /// Phase one of two-phase cancellation. Only this path may set
    /// `cancelling`. Returns the resulting status: `cancelled` when the
    /// execution was still queued, `cancelling` when it was running.
    pub fn request_execution_cancel(
        &self,
        id: &str,
        now_ms: u64,
    ) -> Result<ExecutionStatus, StoreError> {
        let mut inner = self.inner.lock();
        let exec = get_execution(&inner.state, id)?;
        match exec.status {
            ExecutionStatus::Queued | ExecutionStatus::Running => {
                let event = Event::ExecutionCancelRequested {
                    id: exec.id.clone(),
                    at_ms: now_ms,
                };
                emit_locked(&mut inner, event)?;
                Ok(get_execution(&inner.state, id)?.status)
            }
            status => Err(StoreError::Conflict(format!(
                "execution {id} is {status}, cannot cancel"
            ))),
        }
    }

    /// Race-guarded finalisation.
    ///
    /// Writes `status` only while the row is still `running`. When the
    /// guard misses because a cancel arrived first (`cancelling`), the row
    /// is finalised to `cancelled` instead; an already-terminal row is left
    /// untouched.
    pub fn finalize_execution(
        &self,
        id: &str,
        status: ExecutionStatus,
        exit_code: Option<i32>,
        reason: Option<String>,
        usage: ExecutionUsage,
        now_ms: u64,
    ) -> Result<FinalizeOutcome, StoreError> {
        debug_assert!(status.is_terminal());
        let mut inner = self.inner.lock();
        let exec = get_execution(&inner.state, id)?;
        let exec_id = exec.id.clone();
        match exec.status {
            ExecutionStatus::Running => {
                let event = Event::ExecutionFinished {
                    id: exec_id,
                    status,
                    exit_code,
                    reason,
                    ended_at_ms: now_ms,
                    usage,
                };
                emit_locked(&mut inner, event)?;
                Ok(FinalizeOutcome::Finalized(status))
            }
            ExecutionStatus::Cancelling => {
                let event = Event::ExecutionFinished {
                    id: exec_id,
                    status: ExecutionStatus::Cancelled,
                    exit_code,
                    reason,
                    ended_at_ms: now_ms,
                    usage,
                };
                emit_locked(&mut inner, event)?;
                Ok(FinalizeOutcome::CancelledInstead)
            }
            current if current.is_terminal() => Ok(FinalizeOutcome::AlreadyTerminal(current)),
            current => Err(StoreError::Conflict(format!(
                "execution {id} is {current}, cannot finalise"
            ))),
        }
    }

    /// Mark stale running executions `timed_out` and return the rows that
    /// actually matched, so the caller kills only processes it reaped.
    pub fn reap_stale_executions(
        &self,
        threshold_ms: u64,
        now_ms: u64,
    ) -> Result<Vec<Execution>, StoreError> {
        let mut inner = self.inner.lock();
        let stale: Vec<Execution> = inner
            .state
            .executions
            .values()
            .filter(|e| {
                e.status == ExecutionStatus::Running
                    && e.heartbeat_at_ms.unwrap_or(0) + threshold_ms < now_ms
            })
            .cloned()
            .collect();

        for exec in &stale {
            let event = Event::ExecutionFinished {
                id: exec.id.clone(),
                status: ExecutionStatus::TimedOut,
                exit_code: None,
                reason: Some("heartbeat lost — worker stale".to_string()),
                ended_at_ms: now_ms,
                usage: ExecutionUsage::default(),
            };
            emit_locked(&mut inner, event)?;
        }
        Ok(stale)
    }

    /// Non-terminal executions stamped with a worker id (zombie reconciliation).
    pub fn executions_owned_by(&self, worker_id: &WorkerId) -> Vec<Execution> {
        self.read(|state| {
            state
                .executions
                .values()
                .filter(|e| {
                    e.worker_id.as_ref() == Some(worker_id)
                        && matches!(
                            e.status,
                            ExecutionStatus::Running | ExecutionStatus::Cancelling
                        )
                })
                .cloned()
                .collect()
        })
    }

    // === sessions ===

    pub fn create_session(&self, session: Session) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.state.sessions.contains_key(session.id.as_str()) {
            return Err(StoreError::Conflict(format!(
                "session already exists: {}",
                session.id
            )));
        }
        emit_locked(&mut inner, Event::SessionCreated { session })
    }

    pub fn start_session(
        &self,
        id: &str,
        worker_id: &WorkerId,
        pid: u32,
        log_path: &Path,
        now_ms: u64,
    ) -> Result<Session, StoreError> {
        let mut inner = self.inner.lock();
        let session = get_session(&inner.state, id)?;
        let event = Event::SessionStarted {
            id: session.id.clone(),
            worker_id: worker_id.clone(),
            pid,
            log_path: log_path.to_owned(),
            at_ms: now_ms,
        };
        emit_locked(&mut inner, event)?;
        get_session(&inner.state, id).map(Session::clone)
    }

    /// Transition a session, enforcing the session state machine.
    pub fn transition_session(
        &self,
        id: &str,
        to: SessionStatus,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let session = get_session(&inner.state, id)?;
        if session.status == to {
            return Ok(());
        }
        if !session.status.can_transition(to) {
            return Err(StoreError::Conflict(format!(
                "session {id}: illegal transition {} → {to}",
                session.status
            )));
        }
        let event = Event::SessionStatusChanged {
            id: session.id.clone(),
            to,
            at_ms: now_ms,
        };
        emit_locked(&mut inner, event)
    }

    pub fn set_session_resume_ref(&self, id: &str, resume_ref: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let session = get_session(&inner.state, id)?;
        if session.resume_ref.is_some() {
            return Ok(());
        }
        let event = Event::SessionResumeRef {
            id: session.id.clone(),
            resume_ref: resume_ref.to_string(),
        };
        emit_locked(&mut inner, event)
    }

    pub fn set_session_permission_mode(&self, id: &str, mode: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let session = get_session(&inner.state, id)?;
        let event = Event::SessionPermissionMode {
            id: session.id.clone(),
            mode: mode.to_string(),
        };
        emit_locked(&mut inner, event)
    }

    pub fn session_heartbeat(&self, id: &str, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let session = get_session(&inner.state, id)?;
        if session.status.is_terminal() {
            return Ok(());
        }
        let event = Event::SessionHeartbeat {
            id: session.id.clone(),
            at_ms: now_ms,
        };
        emit_locked(&mut inner, event)
    }

    /// Park stale live sessions at `idle` (cold-resume path) and return the
    /// rows that matched. The kill-and-transition is one guarded pass: a
    /// session whose heartbeat was refreshed concurrently is not touched.
    pub fn reap_stale_sessions(
        &self,
        threshold_ms: u64,
        now_ms: u64,
    ) -> Result<Vec<Session>, StoreError> {
        let mut inner = self.inner.lock();
        let stale: Vec<Session> = inner
            .state
            .sessions
            .values()
            .filter(|s| {
                matches!(
                    s.status,
                    SessionStatus::Active | SessionStatus::AwaitingInput
                ) && s.heartbeat_at_ms.unwrap_or(0) + threshold_ms < now_ms
            })
            .cloned()
            .collect();

        for session in &stale {
            let event = Event::SessionStatusChanged {
                id: session.id.clone(),
                to: SessionStatus::Idle,
                at_ms: now_ms,
            };
            emit_locked(&mut inner, event)?;
        }
        Ok(stale)
    }

    /// Non-ended sessions stamped with a worker id (zombie reconciliation).
    pub fn sessions_owned_by(&self, worker_id: &WorkerId) -> Vec<Session> {
        self.read(|state| {
            state
                .sessions
                .values()
                .filter(|s| s.worker_id.as_ref() == Some(worker_id) && s.status.is_live())
                .cloned()
                .collect()
        })
    }

    // === workers ===

    pub fn worker_seen(
        &self,
        worker_id: &WorkerId,
        now_ms: u64,
        running_executions: u32,
        running_sessions: u32,
    ) -> Result<(), StoreError> {
        self.emit(Event::WorkerSeen {
            id: worker_id.clone(),
            at_ms: now_ms,
            running_executions,
            running_sessions,
        })
    }
}

pub(crate) fn emit_locked(inner: &mut Inner, event: Event) -> Result<(), StoreError> {
    inner.state.apply_event(&event);
    inner.wal.append(&event)?;
    Ok(())
}

fn get_execution<'a>(
    state: &'a MaterializedState,
    id: &str,
) -> Result<&'a Execution, StoreError> {
    state
        .executions
        .get(id)
        .ok_or_else(|| StoreError::NotFound(format!("execution not found: {id}")))
}

fn get_session<'a>(state: &'a MaterializedState, id: &str) -> Result<&'a Session, StoreError> {
    state
        .sessions
        .get(id)
        .ok_or_else(|| StoreError::NotFound(format!("session not found: {id}")))
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
