// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gemini adapter: ACP JSON-RPC over line-delimited stdio.
//!
//! Spawns `gemini --experimental-acp` (never with a tmux session). The
//! handshake sends `initialize`, then either `session/start` (storing the
//! returned session id) or, on resume, reuses the caller-supplied id that
//! was stored before spawning. Server-initiated requests carry an `id` and
//! must be answered; permission prompts are auto-approved with the first
//! offered option. Assistant text arrives as `session/update` notifications
//! and each content string is forwarded. Non-JSON stdout lines are ignored.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::process::{spawn_child_with_stdout, write_line, ChildProcess, KillSignal};
use crate::{AdapterError, AgentAdapter, ManagedProcess, OutputChunk, SpawnOpts};

/// Adapter for the `gemini` CLI.
#[derive(Clone, Default)]
#[derive(Debug)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    Initialize,
    SessionStart,
}

#[derive(Default)]
#[derive(Debug)]
struct AcpState {
    next_id: u64,
    session_id: Option<String>,
    pending_prompt: Option<String>,
    pending: HashMap<u64, Pending>,
}

impl AcpState {
    fn request(&mut self, method: &str, params: serde_json::Value) -> (u64, String) {
        self.next_id += 1;
        let id = self.next_id;
        let line = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();
        (id, line)
    }

    fn prompt_line(&mut self, text: &str) -> Result<String, AdapterError> {
        let session_id = self
            .session_id
            .clone()
            .ok_or_else(|| AdapterError::SendFailed("no session id yet".to_string()))?;
        let (_, line) = self.request(
            "session/prompt",
            serde_json::json!({
                "sessionId": session_id,
                "messages": [{ "role": "user", "content": text }],
            }),
        );
        Ok(line)
    }
}

#[derive(Debug, Default, PartialEq)]
struct Routed {
    chunks: Vec<OutputChunk>,
    writes: Vec<String>,
}

fn route_line(line: &str, state: &mut AcpState) -> Routed {
    let mut routed = Routed::default();
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return routed;
    }

    // Non-JSON stdout is ignored per the ACP contract
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return routed;
    };

    let id = value.get("id").and_then(|v| v.as_u64());
    let method = value.get("method").and_then(|v| v.as_str());

    match (id, method) {
        // Response to one of our requests
        (Some(id), None) => {
            let pending = state.pending.remove(&id);
            let result = value.get("result").cloned().unwrap_or_default();

            match pending {
                Some(Pending::SessionStart) => {
                    if let Some(session_id) = result.get("sessionId").and_then(|v| v.as_str()) {
                        state.session_id = Some(session_id.to_string());
                        // Forward the line that named the session so
                        // session-id extraction sees it
                        routed.chunks.push(OutputChunk::stdout(line));
                    }
                    if let Some(prompt) = state.pending_prompt.take() {
                        match state.prompt_line(&prompt) {
                            Ok(prompt_line) => routed.writes.push(prompt_line),
                            Err(_) => state.pending_prompt = Some(prompt),
                        }
                    }
                }
                Some(Pending::Initialize) => {
                    // Resume path: the session id predates the spawn, so the
                    // prompt can go out as soon as the server is initialized
                    if state.session_id.is_some() {
                        if let Some(prompt) = state.pending_prompt.take() {
                            match state.prompt_line(&prompt) {
                                Ok(prompt_line) => routed.writes.push(prompt_line),
                                Err(_) => state.pending_prompt = Some(prompt),
                            }
                        }
                    }
                }
                None => {}
            }
        }

        // Server-initiated request: must be answered
        (Some(id), Some(_)) => {
            let params = value.get("params").cloned().unwrap_or_default();
            let reply = if let Some(first_option) = params
                .get("options")
                .and_then(|o| o.as_array())
                .and_then(|o| o.first())
            {
                let option_id = first_option
                    .get("optionId")
                    .or_else(|| first_option.get("id"))
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                tracing::debug!(%option_id, "auto-approving permission prompt");
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "outcome": "selected", "optionId": option_id },
                })
            } else {
                serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": {} })
            };
            routed.writes.push(reply.to_string());
        }

        // Notification
        (None, Some("session/update")) => {
            if let Some(messages) = value
                .get("params")
                .and_then(|p| p.get("messages"))
                .and_then(|m| m.as_array())
            {
                for message in messages {
                    if message.get("role").and_then(|r| r.as_str()) == Some("assistant") {
                        if let Some(content) = message.get("content").and_then(|c| c.as_str()) {
                            routed.chunks.push(OutputChunk::stdout(content));
                        }
                    }
                }
            }
        }

        // Other notifications are protocol chatter; ignore
        _ => {}
    }

    routed
}

/// Pull the session id out of a forwarded `session/start` response line.
fn session_id_from_line(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    Some(
        value
            .get("result")?
            .get("sessionId")?
            .as_str()?
            .to_string(),
    )
}

async fn spawn_engine(
    input: &str,
    opts: &SpawnOpts,
    resume_session: Option<&str>,
    output_tx: mpsc::Sender<OutputChunk>,
) -> Result<Box<dyn ManagedProcess>, AdapterError> {
    let args = vec!["--experimental-acp".to_string()]
        .into_iter()
        .chain(opts.extra_args.iter().cloned())
        .collect::<Vec<_>>();
    let (child, stdin, stdout) =
        spawn_child_with_stdout(&opts.binary_path, &args, opts, output_tx.clone())?;
    let mut stdin = stdin
        .ok_or_else(|| AdapterError::SpawnFailed("stdin pipe missing".to_string()))?;

    tracing::debug!(
        execution_id = %opts.execution_id,
        pid = child.pid(),
        resuming = resume_session.is_some(),
        "gemini acp spawned"
    );

    let state = Arc::new(Mutex::new(AcpState {
        // On resume the session id is stored before spawning
        session_id: resume_session.map(str::to_string),
        pending_prompt: Some(input.to_string()),
        ..AcpState::default()
    }));

    let handshake = {
        let mut state = state.lock();
        let (init_id, initialize) = state.request("initialize", serde_json::json!({}));
        state.pending.insert(init_id, Pending::Initialize);
        let mut lines = vec![initialize];
        if resume_session.is_none() {
            let (start_id, start) = state.request(
                "session/start",
                serde_json::json!({ "cwd": opts.cwd }),
            );
            state.pending.insert(start_id, Pending::SessionStart);
            lines.push(start);
        }
        lines
    };
    for line in &handshake {
        write_line(&mut stdin, line).await?;
    }

    let stdin = Arc::new(AsyncMutex::new(stdin));
    spawn_reader(stdout, Arc::clone(&state), Arc::clone(&stdin), output_tx);

    Ok(Box::new(GeminiProcess {
        child,
        state,
        stdin,
    }))
}

fn spawn_reader(
    stdout: ChildStdout,
    state: Arc<Mutex<AcpState>>,
    stdin: Arc<AsyncMutex<ChildStdin>>,
    output_tx: mpsc::Sender<OutputChunk>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let routed = {
                let mut state = state.lock();
                route_line(&line, &mut state)
            };
            for chunk in routed.chunks {
                if output_tx.send(chunk).await.is_err() {
                    return;
                }
            }
            for write in routed.writes {
                let mut stdin = stdin.lock().await;
                if write_line(&mut stdin, &write).await.is_err() {
                    return;
                }
            }
        }
    });
}

#[async_trait]
impl AgentAdapter for GeminiAdapter {
    async fn spawn(
        &self,
        input: &str,
        opts: &SpawnOpts,
        output_tx: mpsc::Sender<OutputChunk>,
    ) -> Result<Box<dyn ManagedProcess>, AdapterError> {
        spawn_engine(input, opts, None, output_tx).await
    }

    async fn resume(
        &self,
        session_ref: &str,
        input: &str,
        opts: &SpawnOpts,
        output_tx: mpsc::Sender<OutputChunk>,
    ) -> Result<Box<dyn ManagedProcess>, AdapterError> {
        spawn_engine(input, opts, Some(session_ref), output_tx).await
    }

    fn extract_session_id(&self, line: &str) -> Option<String> {
        session_id_from_line(line)
    }
}

#[derive(Debug)]
struct GeminiProcess {
    child: ChildProcess,
    state: Arc<Mutex<AcpState>>,
    stdin: Arc<AsyncMutex<ChildStdin>>,
}

#[async_trait]
impl ManagedProcess for GeminiProcess {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    fn kill(&self, signal: KillSignal) -> Result<(), AdapterError> {
        self.child.kill(signal)
    }

    async fn send_message(&mut self, text: &str) -> Result<(), AdapterError> {
        let line = self.state.lock().prompt_line(text)?;
        let mut stdin = self.stdin.lock().await;
        write_line(&mut stdin, &line).await
    }

    async fn wait(&mut self) -> Option<i32> {
        self.child.wait().await
    }
}

#[cfg(test)]
#[path = "gemini_tests.rs"]
mod tests;
