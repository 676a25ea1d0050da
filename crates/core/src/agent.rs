// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registered agent binaries.
//!
//! An agent is an administratively registered CLI binary (an AI assistant
//! like `claude`, or any plain tool) that capabilities invoke. Agents are
//! created rarely and mutated rarely; executions reference them by id.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

crate::define_id! {
    /// Unique identifier for a registered agent.
    pub struct AgentId;
}

/// A registered CLI binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    /// Human-facing name (e.g. "Claude Code").
    pub name: String,
    /// Filesystem path to the binary.
    pub binary_path: PathBuf,
    /// Default working directory when the task supplies none.
    pub default_working_dir: PathBuf,
    /// Extra environment variables allowed through to the child,
    /// beyond the safe base allow-list.
    #[serde(default)]
    pub env_allowlist: Vec<String>,
    /// Cap on concurrent (queued + running) executions for this agent.
    pub max_concurrent: u32,
    /// Inactive agents reject new executions.
    pub active: bool,
}

impl Agent {
    /// Lowercased basename of the binary, used for adapter dispatch.
    pub fn binary_basename(&self) -> String {
        self.binary_path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
