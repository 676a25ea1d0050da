// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! agendo-adapters: per-agent protocol engines behind a uniform interface.
//!
//! Each adapter knows how to spawn its agent binary, feed it the initial
//! input, translate its on-the-wire protocol (NDJSON, JSON-RPC app-server,
//! ACP) into plain output chunks, and drive follow-up turns. The runner
//! only ever sees the [`AgentAdapter`] / [`ManagedProcess`] contract.

mod claude;
mod codex;
mod factory;
mod gemini;
mod process;
mod template;

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use factory::adapter_for;
pub use gemini::GeminiAdapter;
pub use process::{kill_process_group, pid_alive, KillSignal};
pub use template::TemplateAdapter;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

use agendo_core::LogTag;

/// Errors from adapter operations
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("kill failed: {0}")]
    KillFailed(String),
    #[error("{0} does not support resume")]
    ResumeUnsupported(String),
    #[error("{0} does not support follow-up messages")]
    MessagesUnsupported(String),
    #[error("no prompt adapter for binary: {0}")]
    UnknownBinary(String),
}

/// Everything an adapter needs to spawn its child.
///
/// The environment arrives fully prepared (built from scratch by the safety
/// module); adapters apply it with `env_clear` and never inherit.
#[derive(Debug, Clone)]
pub struct SpawnOpts {
    /// Execution or session id, for tracing.
    pub execution_id: String,
    /// Path to the agent binary.
    pub binary_path: PathBuf,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    /// Extra argv appended to the adapter's CLI invocation.
    pub extra_args: Vec<String>,
    /// Permission-mode flag value for adapters that take one.
    pub permission_mode: Option<String>,
    /// Model override for adapters that take one.
    pub model: Option<String>,
}

/// One unit of child output, already split into lines and tagged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub tag: LogTag,
    /// Line content without the trailing newline.
    pub text: String,
}

impl OutputChunk {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            tag: LogTag::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            tag: LogTag::Stderr,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            tag: LogTag::System,
            text: text.into(),
        }
    }
}

/// A spawned agent child under adapter management.
///
/// Output is delivered through the channel handed to `spawn`/`resume`
/// (a tagged channel instead of data callbacks); exit is observed via
/// `wait()`, which is cancel-safe and may be polled repeatedly.
#[async_trait]
pub trait ManagedProcess: Send + std::fmt::Debug {
    fn pid(&self) -> u32;

    /// Detached terminal session created alongside the child, if any.
    fn tmux_session(&self) -> Option<&str> {
        None
    }

    /// Deliver a signal to the child. Synchronous and non-blocking.
    fn kill(&self, signal: KillSignal) -> Result<(), AdapterError>;

    /// Send a follow-up user turn through the adapter's channel.
    async fn send_message(&mut self, _text: &str) -> Result<(), AdapterError> {
        Err(AdapterError::MessagesUnsupported(
            "this adapter".to_string(),
        ))
    }

    /// Cancel the current turn without ending the conversation.
    async fn interrupt(&mut self) -> Result<(), AdapterError> {
        self.kill(KillSignal::Int)
    }

    /// Await the child's exit code (`None` when killed by a signal).
    async fn wait(&mut self) -> Option<i32>;
}

/// The uniform adapter contract.
#[async_trait]
pub trait AgentAdapter: Send + Sync + std::fmt::Debug {
    /// Spawn a fresh conversation (or run, for the template adapter).
    async fn spawn(
        &self,
        input: &str,
        opts: &SpawnOpts,
        output_tx: mpsc::Sender<OutputChunk>,
    ) -> Result<Box<dyn ManagedProcess>, AdapterError>;

    /// Resume an existing conversation by its external session reference.
    async fn resume(
        &self,
        session_ref: &str,
        input: &str,
        opts: &SpawnOpts,
        output_tx: mpsc::Sender<OutputChunk>,
    ) -> Result<Box<dyn ManagedProcess>, AdapterError>;

    /// Pull the external session id out of one output line, if present.
    fn extract_session_id(&self, line: &str) -> Option<String>;
}
