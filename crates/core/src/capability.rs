// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capabilities: named invocation patterns owned by an agent.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::agent::AgentId;

crate::define_id! {
    /// Unique identifier for a capability.
    pub struct CapabilityId;
}

/// How a capability invokes its agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Argv substitution into a preset token list; no prompt.
    Template,
    /// Interpolation of a template string into a prompt sent through the
    /// adapter's bidirectional channel.
    Prompt,
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionMode::Template => write!(f, "template"),
            InteractionMode::Prompt => write!(f, "prompt"),
        }
    }
}

/// Per-property constraints in an argument schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Regex the (stringified) value must match, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Free-form description for operators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// JSON-schema-like description of allowed arguments.
///
/// Only the subset the core enforces is modelled: required names and
/// per-property patterns. Arguments must always be scalars.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArgsSchema {
    #[serde(default)]
    pub properties: IndexMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

/// One invocation pattern owned by an agent.
///
/// Exactly one of `command_tokens` / `prompt_template` is populated,
/// according to `interaction_mode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: CapabilityId,
    pub agent_id: AgentId,
    /// Stable key (e.g. "review-pr").
    pub key: String,
    pub interaction_mode: InteractionMode,
    /// Token list for template mode, with `{{name}}` placeholders.
    #[serde(default)]
    pub command_tokens: Vec<String>,
    /// Prompt template for prompt mode, same placeholder grammar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub args_schema: ArgsSchema,
    /// 0 (harmless) to 3 (dangerous).
    pub danger_level: u8,
    pub timeout_sec: u64,
    pub max_output_bytes: u64,
}

impl Capability {
    /// Check the mode/payload invariant: template mode carries tokens,
    /// prompt mode carries a template, never both.
    pub fn payload_consistent(&self) -> bool {
        match self.interaction_mode {
            InteractionMode::Template => {
                !self.command_tokens.is_empty() && self.prompt_template.is_none()
            }
            InteractionMode::Prompt => {
                self.command_tokens.is_empty() && self.prompt_template.is_some()
            }
        }
    }
}

#[cfg(test)]
#[path = "capability_tests.rs"]
mod tests;
