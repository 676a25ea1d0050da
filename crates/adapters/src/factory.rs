// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter selection: a pure function from capability mode and binary
//! basename to adapter.

use std::sync::Arc;

use agendo_core::InteractionMode;

use crate::{
    AdapterError, AgentAdapter, ClaudeAdapter, CodexAdapter, GeminiAdapter, TemplateAdapter,
};

/// Pick the adapter for a capability.
///
/// Template mode always uses the template adapter. Prompt mode dispatches
/// on the lowercased basename of the agent binary; an unknown basename is a
/// hard error; there is no generic prompt transport.
pub fn adapter_for(
    mode: InteractionMode,
    binary_basename: &str,
) -> Result<Arc<dyn AgentAdapter>, AdapterError> {
    match mode {
        InteractionMode::Template => Ok(Arc::new(TemplateAdapter::new())),
        InteractionMode::Prompt => match binary_basename {
            "claude" => Ok(Arc::new(ClaudeAdapter::new())),
            "codex" => Ok(Arc::new(CodexAdapter::new())),
            "gemini" => Ok(Arc::new(GeminiAdapter::new())),
            other => Err(AdapterError::UnknownBinary(other.to_string())),
        },
    }
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
