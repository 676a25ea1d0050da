// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template adapter: fire-and-forget spawn for non-AI CLI tools.
//!
//! The input is the already-substituted command string. It is split on
//! whitespace into binary and argv and spawned directly: no shell, no
//! inherited environment, stdin closed. There is no session to resume and
//! no session id to extract.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::process::{spawn_child, ChildProcess, KillSignal, StdinMode};
use crate::{AdapterError, AgentAdapter, ManagedProcess, OutputChunk, SpawnOpts};

/// Adapter for plain command-line tools.
#[derive(Clone, Default)]
#[derive(Debug)]
pub struct TemplateAdapter;

impl TemplateAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentAdapter for TemplateAdapter {
    async fn spawn(
        &self,
        input: &str,
        opts: &SpawnOpts,
        output_tx: mpsc::Sender<OutputChunk>,
    ) -> Result<Box<dyn ManagedProcess>, AdapterError> {
        let mut tokens = input.split_whitespace();
        let binary = tokens
            .next()
            .ok_or_else(|| AdapterError::SpawnFailed("empty command".to_string()))?;
        let args: Vec<String> = tokens.map(str::to_string).collect();

        let (child, _) = spawn_child(
            &PathBuf::from(binary),
            &args,
            opts,
            StdinMode::Closed,
            output_tx,
        )?;

        tracing::debug!(
            execution_id = %opts.execution_id,
            pid = child.pid(),
            binary,
            "template command spawned"
        );

        Ok(Box::new(TemplateProcess { child }))
    }

    async fn resume(
        &self,
        _session_ref: &str,
        _input: &str,
        _opts: &SpawnOpts,
        _output_tx: mpsc::Sender<OutputChunk>,
    ) -> Result<Box<dyn ManagedProcess>, AdapterError> {
        Err(AdapterError::ResumeUnsupported(
            "template adapter".to_string(),
        ))
    }

    fn extract_session_id(&self, _line: &str) -> Option<String> {
        None
    }
}

#[derive(Debug)]
struct TemplateProcess {
    child: ChildProcess,
}

#[async_trait]
impl ManagedProcess for TemplateProcess {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    fn kill(&self, signal: KillSignal) -> Result<(), AdapterError> {
        self.child.kill(signal)
    }

    async fn wait(&mut self) -> Option<i32> {
        self.child.wait().await
    }
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
