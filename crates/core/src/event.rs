// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable events for the Agendo store.
//!
//! Every state mutation is an event: it is appended to the WAL and applied
//! to the materialized state, so a crash recovers by snapshot + replay.
//! Serializes with `{"type": "entity:verb", ...fields}` format.
//!
//! All handlers applying these events MUST be idempotent: an event may be
//! applied once for immediate visibility and again during WAL replay.

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::capability::Capability;
use crate::execution::{Execution, ExecutionId, ExecutionStatus, ExecutionUsage};
use crate::queue::{QueueJob, QueueJobId};
use crate::session::{Session, SessionId, SessionStatus};
use crate::task::{Task, TaskEvent, TaskId, TaskStatus};
use crate::worker::WorkerId;
use std::path::PathBuf;

/// Events that mutate the materialized state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- registry --
    #[serde(rename = "agent:registered")]
    AgentRegistered { agent: Agent },

    #[serde(rename = "capability:registered")]
    CapabilityRegistered { capability: Capability },

    #[serde(rename = "task:created")]
    TaskCreated { task: Task },

    #[serde(rename = "task:status")]
    TaskStatusChanged { id: TaskId, to: TaskStatus },

    #[serde(rename = "task:event")]
    TaskEventRecorded { entry: TaskEvent },

    // -- queue --
    #[serde(rename = "queue:enqueued")]
    JobEnqueued { job: QueueJob },

    #[serde(rename = "queue:claimed")]
    JobClaimed {
        id: QueueJobId,
        worker_id: WorkerId,
        expires_at_ms: u64,
    },

    #[serde(rename = "queue:completed")]
    JobCompleted { id: QueueJobId },

    /// A failed (or expired) attempt. `retry_at_ms` present means the job
    /// goes back to pending with that availability; absent means dead.
    #[serde(rename = "queue:failed")]
    JobFailed {
        id: QueueJobId,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_at_ms: Option<u64>,
    },

    // -- execution --
    #[serde(rename = "execution:created")]
    ExecutionCreated { execution: Execution },

    #[serde(rename = "execution:started")]
    ExecutionStarted {
        id: ExecutionId,
        worker_id: WorkerId,
        started_at_ms: u64,
        log_path: PathBuf,
    },

    #[serde(rename = "execution:pid")]
    ExecutionPidAssigned {
        id: ExecutionId,
        pid: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tmux_session: Option<String>,
    },

    #[serde(rename = "execution:prompt")]
    ExecutionPromptResolved { id: ExecutionId, prompt: String },

    #[serde(rename = "execution:heartbeat")]
    ExecutionHeartbeat { id: ExecutionId, at_ms: u64 },

    #[serde(rename = "execution:session_ref")]
    ExecutionSessionRef { id: ExecutionId, session_ref: String },

    #[serde(rename = "execution:log_stats")]
    ExecutionLogStats {
        id: ExecutionId,
        byte_size: u64,
        line_count: u64,
    },

    /// Two-phase cancellation, phase one: `queued` cancels directly,
    /// `running` parks at `cancelling` for the runner to observe.
    #[serde(rename = "execution:cancel")]
    ExecutionCancelRequested { id: ExecutionId, at_ms: u64 },

    #[serde(rename = "execution:finished")]
    ExecutionFinished {
        id: ExecutionId,
        status: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        ended_at_ms: u64,
        #[serde(default, skip_serializing_if = "ExecutionUsage::is_empty")]
        usage: ExecutionUsage,
    },

    // -- session --
    #[serde(rename = "session:created")]
    SessionCreated { session: Session },

    #[serde(rename = "session:started")]
    SessionStarted {
        id: SessionId,
        worker_id: WorkerId,
        pid: u32,
        log_path: PathBuf,
        at_ms: u64,
    },

    #[serde(rename = "session:status")]
    SessionStatusChanged {
        id: SessionId,
        to: SessionStatus,
        at_ms: u64,
    },

    #[serde(rename = "session:resume_ref")]
    SessionResumeRef { id: SessionId, resume_ref: String },

    #[serde(rename = "session:permission_mode")]
    SessionPermissionMode { id: SessionId, mode: String },

    #[serde(rename = "session:heartbeat")]
    SessionHeartbeat { id: SessionId, at_ms: u64 },

    // -- worker --
    #[serde(rename = "worker:seen")]
    WorkerSeen {
        id: WorkerId,
        at_ms: u64,
        #[serde(default)]
        running_executions: u32,
        #[serde(default)]
        running_sessions: u32,
    },
}

impl Event {
    /// Short name for tracing.
    pub fn name(&self) -> &'static str {
        match self {
            Event::AgentRegistered { .. } => "agent:registered",
            Event::CapabilityRegistered { .. } => "capability:registered",
            Event::TaskCreated { .. } => "task:created",
            Event::TaskStatusChanged { .. } => "task:status",
            Event::TaskEventRecorded { .. } => "task:event",
            Event::JobEnqueued { .. } => "queue:enqueued",
            Event::JobClaimed { .. } => "queue:claimed",
            Event::JobCompleted { .. } => "queue:completed",
            Event::JobFailed { .. } => "queue:failed",
            Event::ExecutionCreated { .. } => "execution:created",
            Event::ExecutionStarted { .. } => "execution:started",
            Event::ExecutionPidAssigned { .. } => "execution:pid",
            Event::ExecutionPromptResolved { .. } => "execution:prompt",
            Event::ExecutionHeartbeat { .. } => "execution:heartbeat",
            Event::ExecutionSessionRef { .. } => "execution:session_ref",
            Event::ExecutionLogStats { .. } => "execution:log_stats",
            Event::ExecutionCancelRequested { .. } => "execution:cancel",
            Event::ExecutionFinished { .. } => "execution:finished",
            Event::SessionCreated { .. } => "session:created",
            Event::SessionStarted { .. } => "session:started",
            Event::SessionStatusChanged { .. } => "session:status",
            Event::SessionResumeRef { .. } => "session:resume_ref",
            Event::SessionPermissionMode { .. } => "session:permission_mode",
            Event::SessionHeartbeat { .. } => "session:heartbeat",
            Event::WorkerSeen { .. } => "worker:seen",
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
