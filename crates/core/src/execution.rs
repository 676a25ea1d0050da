// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution records and their state machine.
//!
//! An execution is one bounded run of a capability against a task. The row
//! is multi-writer (runner, cancel path, stale reaper, zombie reconciler);
//! every mutation goes through a guarded transition so a concurrent
//! cancellation is never clobbered.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::agent::AgentId;
use crate::capability::{CapabilityId, InteractionMode};
use crate::task::TaskId;
use crate::worker::WorkerId;

crate::define_id! {
    /// Unique identifier for an execution.
    pub struct ExecutionId;
}

/// Execution lifecycle status.
///
/// `queued → {running, cancelled}`; `running → {cancelling, succeeded,
/// failed, timed_out}`; `cancelling → {cancelled, failed}`. The four
/// right-hand statuses are terminal. Only the cancel path may set
/// `cancelling`; every other transition is owned by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Cancelling,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::TimedOut
        )
    }

    /// Whether `self → to` is a legal transition.
    pub fn can_transition(self, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, to),
            (Queued, Running | Cancelled)
                | (Running, Cancelling | Succeeded | Failed | TimedOut)
                | (Cancelling, Cancelled | Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Queued => write!(f, "queued"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Cancelling => write!(f, "cancelling"),
            ExecutionStatus::Succeeded => write!(f, "succeeded"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
            ExecutionStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Cost/turn accounting extracted from the post-mortem log scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionUsage {
    pub fn is_empty(&self) -> bool {
        self.cost_usd.is_none() && self.num_turns.is_none() && self.duration_ms.is_none()
    }
}

/// One run of a capability against a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub capability_id: CapabilityId,
    /// Copied from the capability at creation so later capability edits
    /// don't change the record's meaning.
    pub mode: InteractionMode,
    #[serde(default)]
    pub args: HashMap<String, String>,
    /// Resolved prompt (prompt mode only), stored before spawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub status: ExecutionStatus,
    /// Worker that claimed the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_session: Option<String>,
    /// Opaque session reference issued by the agent's own protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_ref: Option<String>,
    /// Previous execution in a continuation chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<ExecutionId>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub log_byte_size: u64,
    #[serde(default)]
    pub log_line_count: u64,
    #[serde(default, skip_serializing_if = "ExecutionUsage::is_empty")]
    pub usage: ExecutionUsage,
    /// Extra argv appended to the adapter's CLI invocation.
    #[serde(default)]
    pub cli_flags: Vec<String>,
    /// One-line reason for a non-success terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Execution {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "execution_tests.rs"]
mod tests;
