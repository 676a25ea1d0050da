// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! Accepts connections and handles them without blocking the worker.
//! One request per connection; stream requests keep the connection open
//! and push event frames until `done`.

use std::sync::Arc;
use std::time::Instant;

use agendo_core::{CoreError, SessionStatus, SystemClock, UuidIdGen};
#[allow(unused_imports)]
use agendo_runner::{service, ExecutionRequest, SessionCommand, SessionControl, SessionRequest};
use agendo_storage::Store;
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::env::Config;
use crate::logstream::{self, StreamTarget};
use crate::protocol::{self, Request, Response, StatusSummary, DEFAULT_TIMEOUT};
use crate::worker::SessionRegistry;

/// Shared daemon context for all request handlers.
pub struct ListenCtx {
    pub store: Store,
    pub config: Config,
    pub sessions: SessionRegistry,
    pub start_time: Instant,
    pub shutdown: Arc<Notify>,
}

/// Listener task for accepting socket connections.
pub struct Listener {
    socket: UnixListener,
    ctx: Arc<ListenCtx>,
}

/// Errors from connection handling.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
}

impl Listener {
    pub fn new(socket: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { socket, ctx }
    }

    /// Run the accept loop, spawning a task per connection.
    pub async fn run(self) {
        loop {
            match self.socket.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &ctx).await {
                            match e {
                                ConnectionError::Protocol(
                                    protocol::ProtocolError::ConnectionClosed,
                                ) => debug!("client disconnected"),
                                ConnectionError::Protocol(protocol::ProtocolError::Timeout) => {
                                    warn!("connection timeout")
                                }
                                _ => error!("connection error: {}", e),
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, ctx: &ListenCtx) -> Result<(), ConnectionError> {
    let (mut reader, mut writer) = stream.into_split();
    let request = protocol::read_request(&mut reader, DEFAULT_TIMEOUT).await?;

    debug!(request = ?request, "received request");

    // Stream requests hold the connection and push frames
    match &request {
        Request::StreamExecutionLogs { id } => {
            protocol::write_message(&mut writer, &Response::Stream).await?;
            logstream::stream_logs(&ctx.store, StreamTarget::Execution, id, &mut writer).await?;
            return Ok(());
        }
        Request::StreamSessionLogs { id } => {
            protocol::write_message(&mut writer, &Response::Stream).await?;
            logstream::stream_logs(&ctx.store, StreamTarget::Session, id, &mut writer).await?;
            return Ok(());
        }
        _ => {}
    }

    let response = handle_request(request, ctx).await;
    debug!(response = ?response, "sending response");
    protocol::write_message(&mut writer, &response).await?;
    Ok(())
}

async fn handle_request(request: Request, ctx: &ListenCtx) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Status => {
            let (running_executions, running_sessions, queued_jobs) = ctx.store.read(|state| {
                let executions = state
                    .executions
                    .values()
                    .filter(|e| !e.is_terminal() && e.status != agendo_core::ExecutionStatus::Queued)
                    .count() as u32;
                let sessions = state
                    .sessions
                    .values()
                    .filter(|s| s.status.is_live())
                    .count() as u32;
                let jobs = state
                    .queue_jobs
                    .values()
                    .filter(|j| j.status == agendo_core::QueueJobStatus::Pending)
                    .count() as u32;
                (executions, sessions, jobs)
            });
            Response::Status {
                status: StatusSummary {
                    worker_id: ctx.config.worker_id.to_string(),
                    running_executions,
                    running_sessions,
                    queued_jobs,
                    uptime_secs: ctx.start_time.elapsed().as_secs(),
                },
            }
        }

        Request::RegisterAgent { agent } => ctx
            .store
            .register_agent(agent)
            .map(|_| Response::Ok)
            .unwrap_or_else(|e| Response::error(&e.into())),

        Request::RegisterCapability { capability } => ctx
            .store
            .register_capability(capability)
            .map(|_| Response::Ok)
            .unwrap_or_else(|e| Response::error(&e.into())),

        Request::CreateTask { task } => ctx
            .store
            .create_task(task)
            .map(|_| Response::Ok)
            .unwrap_or_else(|e| Response::error(&e.into())),

        Request::CreateExecution {
            task_id,
            capability_id,
            args,
            parent_execution_id,
            session_ref,
            cli_flags,
        } => service::create_execution(
            &ctx.store,
            &ctx.config.runner_config(),
            &SystemClock,
            &UuidIdGen,
            ExecutionRequest {
                task_id,
                capability_id,
                args,
                parent_execution_id,
                session_ref,
                cli_flags,
            },
        )
        .map(|id| Response::ExecutionCreated { id: id.to_string() })
        .unwrap_or_else(|e| Response::error(&e)),

        Request::CancelExecution { id } => {
            service::cancel_execution(&ctx.store, &SystemClock, &id)
                .map(|status| Response::CancelAccepted {
                    status: status.to_string(),
                })
                .unwrap_or_else(|e| Response::error(&e))
        }

        Request::PostMessage { id, text } => service::post_message(
            &ctx.store,
            &ctx.config.runner_config(),
            &SystemClock,
            &id,
            &text,
        )
        .map(|_| Response::Ok)
        .unwrap_or_else(|e| Response::error(&e)),

        Request::GetExecution { id } => ctx
            .store
            .read(|state| state.get_execution(&id).cloned())
            .map(|execution| Response::Execution {
                execution: Box::new(execution),
            })
            .unwrap_or_else(|| {
                Response::error(&CoreError::NotFound(format!("execution not found: {id}")))
            }),

        Request::CreateSession {
            task_id,
            capability_id,
            initial_prompt,
            permission_mode,
            team,
        } => service::create_session(
            &ctx.store,
            &ctx.config.runner_config(),
            &SystemClock,
            &UuidIdGen,
            SessionRequest {
                task_id,
                capability_id,
                initial_prompt,
                permission_mode,
                team,
            },
        )
        .map(|id| Response::SessionCreated { id: id.to_string() })
        .unwrap_or_else(|e| Response::error(&e)),

        Request::SessionMessage { id, text } => handle_session_message(ctx, &id, &text).await,

        Request::SessionSetPermissionMode { id, mode } => {
            match ctx.sessions.get(&id) {
                Some(control) => control
                    .commands
                    .send(SessionCommand::SetPermissionMode(mode))
                    .await
                    .map(|_| Response::Ok)
                    .unwrap_or_else(|_| {
                        Response::error(&CoreError::Conflict(format!(
                            "session {id} supervisor is gone"
                        )))
                    }),
                None => Response::error(&CoreError::Conflict(format!(
                    "session {id} has no live supervisor"
                ))),
            }
        }

        Request::StreamExecutionLogs { .. } | Request::StreamSessionLogs { .. } => {
            // Handled before dispatch
            Response::Stream
        }

        Request::Shutdown => {
            ctx.shutdown.notify_one();
            Response::ShuttingDown
        }
    }
}

/// Route a session message: live supervisors get it over the command
/// channel; idle sessions get a message-drop file plus a cold-resume
/// enqueue.
async fn handle_session_message(ctx: &ListenCtx, id: &str, text: &str) -> Response {
    if let Some(control) = ctx.sessions.get(id) {
        return control
            .commands
            .send(SessionCommand::UserMessage(text.to_string()))
            .await
            .map(|_| Response::Ok)
            .unwrap_or_else(|_| {
                Response::error(&CoreError::Conflict(format!(
                    "session {id} supervisor is gone"
                )))
            });
    }

    let session = ctx.store.read(|state| state.get_session(id).cloned());
    let Some(session) = session else {
        return Response::error(&CoreError::NotFound(format!("session not found: {id}")));
    };
    if session.status != SessionStatus::Idle {
        return Response::error(&CoreError::Conflict(format!(
            "session {id} is {}, not addressable",
            session.status
        )));
    }

    let clock = SystemClock;
    let dir = agendo_runner::messages::message_dir(&ctx.config.message_root, session.id.as_str());
    if let Err(e) = agendo_runner::messages::drop_message(
        &dir,
        agendo_core::Clock::epoch_ms(&clock),
        text,
    ) {
        return Response::error(&CoreError::Internal(e.to_string()));
    }
    match ctx.store.enqueue(
        agendo_core::QueueName::RunSession,
        session.id.as_str(),
        agendo_core::Clock::epoch_ms(&clock),
    ) {
        Ok(_) => Response::Ok,
        Err(e) => Response::error(&e.into()),
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
