// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Long-lived multi-turn sessions.
//!
//! A session keeps an adapter alive between turns. It shares the identity
//! fields of an execution but has its own status machine and carries the
//! conversation-level settings (permission mode, resume reference).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::agent::AgentId;
use crate::capability::CapabilityId;
use crate::task::TaskId;
use crate::worker::WorkerId;

crate::define_id! {
    /// Unique identifier for a session.
    pub struct SessionId;
}

/// Session lifecycle status.
///
/// `starting → active ↔ awaiting_input`, with `idle` as the cold-resume
/// parking state and `ended` terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Active,
    AwaitingInput,
    Idle,
    Ended,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Ended)
    }

    /// Whether the session currently owns a live process.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionStatus::Starting | SessionStatus::Active | SessionStatus::AwaitingInput
        )
    }

    /// Whether `self → to` is a legal transition.
    pub fn can_transition(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Starting, Active | Ended)
                | (Active, AwaitingInput | Idle | Ended)
                | (AwaitingInput, Active | Idle | Ended)
                | (Idle, Starting | Ended)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::AwaitingInput => write!(f, "awaiting_input"),
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Ended => write!(f, "ended"),
        }
    }
}

/// A long-lived conversation on top of an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub capability_id: CapabilityId,
    pub status: SessionStatus,
    pub initial_prompt: String,
    /// Adapter permission-mode flag value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    /// External session reference used for cold resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_ref: Option<String>,
    /// Team inbox this session is joined to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
