// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tasks and their audit trail.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

crate::define_id! {
    /// Unique identifier for a task.
    pub struct TaskId;
}

/// Board status of a task. No task state is permanently terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Whether `self → to` is a legal transition.
    pub fn can_transition(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Todo, InProgress | Cancelled | Blocked)
                | (InProgress, Done | Blocked | Cancelled | Todo)
                | (Blocked, Todo | InProgress | Cancelled)
                | (Done, Todo)
                | (Cancelled, Todo)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Free-form input carried by a task and consumed at execution time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputContext {
    /// Working-directory override (still subject to the allow-list).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Environment overrides (filtered through the agent allow-list).
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Free-form arguments merged under capability arguments.
    #[serde(default)]
    pub args: HashMap<String, String>,
    /// Text appended to prompt-mode prompts via `{{input_context.prompt_additions}}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_additions: Option<String>,
}

/// A unit of work on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    /// Sparse ordering key within a column.
    pub sort_key: f64,
    #[serde(default)]
    pub input_context: InputContext,
}

/// Append-only audit record attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    /// Who did it ("api", "worker:<id>", …).
    pub actor: String,
    /// Short event kind ("execution_created", "execution_finished", …).
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub at_ms: u64,
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
