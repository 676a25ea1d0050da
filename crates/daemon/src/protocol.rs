// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol for daemon communication.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload. A
//! connection carries one request and one response, except the stream
//! requests, where the `Stream` ack is followed by a sequence of
//! [`StreamEvent`] frames and the connection closes after `done`/`error`.

use std::collections::HashMap;

use agendo_core::{Agent, Capability, CoreError, Execution, StreamEvent, Task};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default IPC timeout for the request/response halves
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,
}

/// Request from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Health check ping
    Ping,

    /// Daemon status summary
    Status,

    /// Register a CLI binary
    RegisterAgent { agent: Agent },

    /// Register an invocation pattern
    RegisterCapability { capability: Capability },

    /// Create a task
    CreateTask { task: Task },

    /// Create an execution and enqueue it
    CreateExecution {
        task_id: String,
        capability_id: String,
        #[serde(default)]
        args: HashMap<String, serde_json::Value>,
        #[serde(default)]
        parent_execution_id: Option<String>,
        #[serde(default)]
        session_ref: Option<String>,
        #[serde(default)]
        cli_flags: Vec<String>,
    },

    /// Two-phase cancel
    CancelExecution { id: String },

    /// Drop one inbound message for a running execution
    PostMessage { id: String, text: String },

    /// Fetch an execution by id or unique prefix
    GetExecution { id: String },

    /// Create a session and enqueue it
    CreateSession {
        task_id: String,
        capability_id: String,
        initial_prompt: String,
        #[serde(default)]
        permission_mode: Option<String>,
        #[serde(default)]
        team: Option<String>,
    },

    /// Send a user turn to a session (live or cold)
    SessionMessage { id: String, text: String },

    /// Restart the session's adapter under a new permission mode
    SessionSetPermissionMode { id: String, mode: String },

    /// Stream an execution's log as typed events
    StreamExecutionLogs { id: String },

    /// Stream a session's log as typed events
    StreamSessionLogs { id: String },

    /// Request daemon shutdown
    Shutdown,
}

/// Daemon status summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSummary {
    pub worker_id: String,
    pub running_executions: u32,
    pub running_sessions: u32,
    pub queued_jobs: u32,
    pub uptime_secs: u64,
}

/// Response from the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    Pong,
    Ok,
    Status { status: StatusSummary },
    ExecutionCreated { id: String },
    /// 202-equivalent: the cancel was accepted; `status` is the resulting
    /// execution status (`cancelled` or `cancelling`).
    CancelAccepted { status: String },
    Execution { execution: Box<Execution> },
    SessionCreated { id: String },
    /// Ack for stream requests; `StreamEvent` frames follow.
    Stream,
    ShuttingDown,
    Error { code: String, message: String },
}

impl Response {
    pub fn error(err: &CoreError) -> Self {
        Response::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Encode a message to JSON bytes (without length prefix).
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(json)
}

/// Decode a message from wire bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read a length-prefixed message from an async reader.
pub async fn read_message<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a length-prefixed message to an async writer.
pub async fn write_message<W: tokio::io::AsyncWriteExt + Unpin, T: Serialize>(
    writer: &mut W,
    msg: &T,
) -> Result<(), ProtocolError> {
    let payload = encode(msg)?;
    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a request with a timeout.
pub async fn read_request<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
    timeout: std::time::Duration,
) -> Result<Request, ProtocolError> {
    let bytes = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    decode(&bytes)
}

/// Write one stream event frame.
pub async fn write_stream_event<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    event: &StreamEvent,
) -> Result<(), ProtocolError> {
    write_message(writer, event).await
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
