// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Codex adapter: app-server JSON-RPC over newline-delimited stdio.
//!
//! Three message shapes: request (`id` + `method`), notification (`method`,
//! no `id`), response (`id` + `result`). The engine keeps a monotone
//! request id, the current thread id, and the current turn id; the initial
//! `turn/start` is driven by the `thread/start` response rather than a
//! fixed delay, so a slow handshake cannot race it.
//!
//! Payload-bearing lines are forwarded verbatim so the log keeps protocol
//! fidelity and observers reparse the JSON-RPC themselves.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::process::{spawn_child_with_stdout, write_line, ChildProcess, KillSignal};
use crate::{AdapterError, AgentAdapter, ManagedProcess, OutputChunk, SpawnOpts};

const APPROVAL_POLICY: &str = "auto-edit";

/// Adapter for the `codex` CLI (`codex app-server`).
#[derive(Clone, Default)]
#[derive(Debug)]
pub struct CodexAdapter;

impl CodexAdapter {
    pub fn new() -> Self {
        Self
    }
}

/// What an in-flight request was for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    ThreadStart,
    /// Resume carries the stored thread id as a fallback in case the
    /// response does not echo it.
    ThreadResume(String),
    TurnStart,
}

/// Protocol engine state, shared between the reader task and the handle.
#[derive(Default)]
#[derive(Debug)]
struct RpcState {
    next_id: u64,
    thread_id: Option<String>,
    turn_id: Option<String>,
    /// Initial prompt, held until the thread id is known.
    pending_prompt: Option<String>,
    pending: HashMap<u64, Pending>,
}

impl RpcState {
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

    fn notification(method: &str, params: serde_json::Value) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        })
        .to_string()
    }

    fn turn_start_line(&mut self, text: &str) -> Result<String, AdapterError> {
        let thread_id = self
            .thread_id
            .clone()
            .ok_or_else(|| AdapterError::SendFailed("no thread id yet".to_string()))?;
        let (id, line) = self.request(
            "turn/start",
            serde_json::json!({
                "threadId": thread_id,
                "input": [{ "type": "text", "text": text }],
            }),
        );
        self.pending.insert(id, Pending::TurnStart);
        Ok(line)
    }
}

/// Everything one inbound line produces: chunks for the log and lines to
/// write back to the child.
#[derive(Debug, Default, PartialEq)]
struct Routed {
    chunks: Vec<OutputChunk>,
    writes: Vec<String>,
}

/// Route one stdout line through the protocol engine.
fn route_line(line: &str, state: &mut RpcState) -> Routed {
    let mut routed = Routed::default();
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return routed;
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        // Not protocol traffic; keep it visible
        routed.chunks.push(OutputChunk::stdout(line));
        return routed;
    };

    let id = value.get("id").and_then(|v| v.as_u64());
    let method = value.get("method").and_then(|v| v.as_str());

    match (id, method) {
        // Response
        (Some(id), None) => {
            if let Some(error) = value.get("error") {
                routed
                    .chunks
                    .push(OutputChunk::system(format!("rpc error: {error}")));
                state.pending.remove(&id);
                return routed;
            }

            let result = value.get("result").cloned().unwrap_or_default();
            let pending = state.pending.remove(&id);

            let thread_id = result
                .get("threadId")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or(match pending {
                    Some(Pending::ThreadResume(stored)) => Some(stored),
                    _ => None,
                });

            if let Some(thread_id) = thread_id {
                state.thread_id = Some(thread_id);
                // Forward the response that named the thread so session-id
                // extraction sees it
                routed.chunks.push(OutputChunk::stdout(line));
                if let Some(prompt) = state.pending_prompt.take() {
                    match state.turn_start_line(&prompt) {
                        Ok(turn_line) => routed.writes.push(turn_line),
                        Err(_) => state.pending_prompt = Some(prompt),
                    }
                }
            }
            if let Some(turn_id) = result.get("turnId").and_then(|v| v.as_str()) {
                state.turn_id = Some(turn_id.to_string());
            }
        }

        // Notification
        (None, Some(method)) => match method {
            "item/agentMessage/delta" | "item/commandExecution/outputDelta" => {
                routed.chunks.push(OutputChunk::stdout(line));
            }
            "turn/completed" => {
                state.turn_id = None;
            }
            "item/commandExecution/requestApproval" => {
                let approval_id = value
                    .get("params")
                    .and_then(|p| p.get("id"))
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                tracing::debug!(%approval_id, "auto-approving command execution");
                let (_, approve) = state.request(
                    "item/commandExecution/approve",
                    serde_json::json!({ "id": approval_id }),
                );
                routed.writes.push(approve);
            }
            _ => {
                routed.chunks.push(OutputChunk::system(line));
            }
        },

        // Server-initiated request or anything else: surface as diagnostic
        _ => {
            routed.chunks.push(OutputChunk::system(line));
        }
    }

    routed
}

/// Pull the thread id out of a forwarded response line.
fn thread_id_from_line(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    Some(
        value
            .get("result")?
            .get("threadId")?
            .as_str()?
            .to_string(),
    )
}

async fn spawn_engine(
    input: &str,
    opts: &SpawnOpts,
    resume_thread: Option<&str>,
    output_tx: mpsc::Sender<OutputChunk>,
) -> Result<Box<dyn ManagedProcess>, AdapterError> {
    let args = vec!["app-server".to_string()]
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
        resuming = resume_thread.is_some(),
        "codex app-server spawned"
    );

    let state = Arc::new(Mutex::new(RpcState {
        pending_prompt: Some(input.to_string()),
        ..RpcState::default()
    }));

    // Handshake: initialize, initialized, thread/start|thread/resume.
    // turn/start follows from the thread response inside the engine loop.
    let handshake = {
        let mut state = state.lock();
        let (_, initialize) = state.request("initialize", serde_json::json!({}));
        let initialized = RpcState::notification("initialized", serde_json::json!({}));
        let thread = match resume_thread {
            Some(thread_id) => {
                let (id, line) = state.request(
                    "thread/resume",
                    serde_json::json!({ "threadId": thread_id }),
                );
                state
                    .pending
                    .insert(id, Pending::ThreadResume(thread_id.to_string()));
                line
            }
            None => {
                let mut params = serde_json::json!({
                    "cwd": opts.cwd,
                    "approvalPolicy": APPROVAL_POLICY,
                });
                if let Some(model) = &opts.model {
                    params["model"] = serde_json::Value::String(model.clone());
                }
                let (id, line) = state.request("thread/start", params);
                state.pending.insert(id, Pending::ThreadStart);
                line
            }
        };
        [initialize, initialized, thread]
    };
    for line in &handshake {
        write_line(&mut stdin, line).await?;
    }

    let stdin = Arc::new(AsyncMutex::new(stdin));
    spawn_reader(stdout, Arc::clone(&state), Arc::clone(&stdin), output_tx);

    Ok(Box::new(CodexProcess {
        child,
        state,
        stdin,
    }))
}

/// Reader task: route every stdout line, forward chunks, write replies.
fn spawn_reader(
    stdout: ChildStdout,
    state: Arc<Mutex<RpcState>>,
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
impl AgentAdapter for CodexAdapter {
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
        thread_id_from_line(line)
    }
}

#[derive(Debug)]
struct CodexProcess {
    child: ChildProcess,
    state: Arc<Mutex<RpcState>>,
    stdin: Arc<AsyncMutex<ChildStdin>>,
}

#[async_trait]
impl ManagedProcess for CodexProcess {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    fn kill(&self, signal: KillSignal) -> Result<(), AdapterError> {
        self.child.kill(signal)
    }

    async fn send_message(&mut self, text: &str) -> Result<(), AdapterError> {
        let line = self.state.lock().turn_start_line(text)?;
        let mut stdin = self.stdin.lock().await;
        write_line(&mut stdin, &line).await
    }

    async fn interrupt(&mut self) -> Result<(), AdapterError> {
        let line = {
            let mut state = self.state.lock();
            let thread_id = state
                .thread_id
                .clone()
                .ok_or_else(|| AdapterError::SendFailed("no thread id yet".to_string()))?;
            let turn_id = state.turn_id.clone();
            let (_, line) = state.request(
                "turn/interrupt",
                serde_json::json!({ "threadId": thread_id, "turnId": turn_id }),
            );
            line
        };
        let mut stdin = self.stdin.lock().await;
        write_line(&mut stdin, &line).await
    }

    async fn wait(&mut self) -> Option<i32> {
        self.child.wait().await
    }
}

#[cfg(test)]
#[path = "codex_tests.rs"]
mod tests;
