// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claude adapter: stream-json NDJSON over stdio.
//!
//! Spawns `claude -p --input-format stream-json --output-format stream-json
//! --verbose --permission-mode <mode> [--resume <ref>]` and talks NDJSON on
//! both pipes: user turns are written as one JSON line each, and every
//! stdout line is forwarded verbatim to the output channel. The session id
//! is carried by the first `type=system, subtype=init` message.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, Mutex};

use crate::process::{spawn_child, write_line, ChildProcess, KillSignal, StdinMode};
use crate::{AdapterError, AgentAdapter, ManagedProcess, OutputChunk, SpawnOpts};

const DEFAULT_PERMISSION_MODE: &str = "bypassPermissions";

/// Adapter for the `claude` CLI.
#[derive(Clone, Default)]
#[derive(Debug)]
pub struct ClaudeAdapter;

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self
    }

    fn build_args(opts: &SpawnOpts, resume: Option<&str>) -> Vec<String> {
        let mode = opts
            .permission_mode
            .as_deref()
            .unwrap_or(DEFAULT_PERMISSION_MODE);
        let mut args = vec![
            "-p".to_string(),
            "--input-format".to_string(),
            "stream-json".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--permission-mode".to_string(),
            mode.to_string(),
        ];
        if let Some(session_ref) = resume {
            args.push("--resume".to_string());
            args.push(session_ref.to_string());
        }
        args.extend(opts.extra_args.iter().cloned());
        args
    }

    async fn spawn_inner(
        &self,
        input: &str,
        opts: &SpawnOpts,
        resume: Option<&str>,
        output_tx: mpsc::Sender<OutputChunk>,
    ) -> Result<Box<dyn ManagedProcess>, AdapterError> {
        let args = Self::build_args(opts, resume);
        let (child, stdin) = spawn_child(
            &opts.binary_path,
            &args,
            opts,
            StdinMode::Piped,
            output_tx,
        )?;
        let mut stdin = stdin
            .ok_or_else(|| AdapterError::SpawnFailed("stdin pipe missing".to_string()))?;

        tracing::debug!(
            execution_id = %opts.execution_id,
            pid = child.pid(),
            resuming = resume.is_some(),
            "claude spawned"
        );

        write_line(&mut stdin, &user_message_line(input)).await?;

        Ok(Box::new(ClaudeProcess {
            child,
            stdin: Arc::new(Mutex::new(stdin)),
        }))
    }
}

/// Serialize one user turn as a stream-json input line.
fn user_message_line(text: &str) -> String {
    serde_json::json!({
        "type": "user",
        "message": { "role": "user", "content": text },
        "session_id": "default",
        "parent_tool_use_id": null,
    })
    .to_string()
}

/// Parse one NDJSON line for the init message's session id.
fn session_id_from_line(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    if value.get("type")?.as_str()? != "system" {
        return None;
    }
    if value.get("subtype")?.as_str()? != "init" {
        return None;
    }
    Some(value.get("session_id")?.as_str()?.to_string())
}

#[async_trait]
impl AgentAdapter for ClaudeAdapter {
    async fn spawn(
        &self,
        input: &str,
        opts: &SpawnOpts,
        output_tx: mpsc::Sender<OutputChunk>,
    ) -> Result<Box<dyn ManagedProcess>, AdapterError> {
        self.spawn_inner(input, opts, None, output_tx).await
    }

    async fn resume(
        &self,
        session_ref: &str,
        input: &str,
        opts: &SpawnOpts,
        output_tx: mpsc::Sender<OutputChunk>,
    ) -> Result<Box<dyn ManagedProcess>, AdapterError> {
        self.spawn_inner(input, opts, Some(session_ref), output_tx)
            .await
    }

    fn extract_session_id(&self, line: &str) -> Option<String> {
        session_id_from_line(line)
    }
}

#[derive(Debug)]
struct ClaudeProcess {
    child: ChildProcess,
    stdin: Arc<Mutex<ChildStdin>>,
}

#[async_trait]
impl ManagedProcess for ClaudeProcess {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    fn kill(&self, signal: KillSignal) -> Result<(), AdapterError> {
        self.child.kill(signal)
    }

    async fn send_message(&mut self, text: &str) -> Result<(), AdapterError> {
        let mut stdin = self.stdin.lock().await;
        write_line(&mut stdin, &user_message_line(text)).await
    }

    // SIGINT is a turn cancellation for claude, not a shutdown
    async fn interrupt(&mut self) -> Result<(), AdapterError> {
        self.child.kill(KillSignal::Int)
    }

    async fn wait(&mut self) -> Option<i32> {
        self.child.wait().await
    }
}

#[cfg(test)]
#[path = "claude_tests.rs"]
mod tests;
