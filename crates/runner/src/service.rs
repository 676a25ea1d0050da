// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service layer: the operations the API boundary exposes.
//!
//! Validation happens here, before any record exists: a request that
//! fails the safety checks creates nothing and enqueues nothing.

use std::collections::HashMap;

use agendo_core::{
    Capability, Clock, CoreError, Execution, ExecutionId, ExecutionStatus, ExecutionUsage, IdGen,
    InteractionMode, QueueName, Session, SessionId, SessionStatus, Task, TaskEvent,
};
use agendo_storage::Store;

use crate::{messages, safety, RunnerConfig};

/// Request shape for `POST /api/executions`.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub task_id: String,
    pub capability_id: String,
    /// Raw argument values; objects and arrays are rejected.
    pub args: HashMap<String, serde_json::Value>,
    /// Continuation chain: both must be set for a resume.
    pub parent_execution_id: Option<String>,
    pub session_ref: Option<String>,
    pub cli_flags: Vec<String>,
}

/// Request shape for session creation.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub task_id: String,
    pub capability_id: String,
    pub initial_prompt: String,
    pub permission_mode: Option<String>,
    pub team: Option<String>,
}

/// Validate a request, insert the execution in `queued`, and enqueue the
/// job. Returns the new execution id.
pub fn create_execution<C: Clock>(
    store: &Store,
    config: &RunnerConfig,
    clock: &C,
    ids: &impl IdGen,
    request: ExecutionRequest,
) -> Result<ExecutionId, CoreError> {
    let (task, capability, agent) = load_target(store, &request.task_id, &request.capability_id)?;
    if !agent.active {
        return Err(CoreError::Conflict(format!(
            "agent {} is inactive",
            agent.id
        )));
    }

    // Scalars only, then merge under the task's free-form arguments
    let mut args = task.input_context.args.clone();
    args.extend(safety::require_scalar_args(&request.args).map_err(CoreError::from)?);

    safety::validate_args(&capability.args_schema, &args).map_err(CoreError::from)?;
    if capability.interaction_mode == InteractionMode::Template {
        safety::build_command_args(&capability.command_tokens, &args).map_err(CoreError::from)?;
    } else {
        safety::validate_binary(&agent.binary_path).map_err(CoreError::from)?;
    }

    // Symlink traversal is rejected here: no record, no process
    let requested_cwd = task
        .input_context
        .working_dir
        .clone()
        .unwrap_or_else(|| agent.default_working_dir.clone());
    safety::validate_working_dir(&requested_cwd, &config.allowed_working_dirs)
        .map_err(CoreError::from)?;

    if request.parent_execution_id.is_some() != request.session_ref.is_some() {
        return Err(CoreError::Validation(
            "parent_execution_id and session_ref must be set together".to_string(),
        ));
    }

    let now_ms = clock.epoch_ms();
    let execution = Execution {
        id: ExecutionId::new(ids.next()),
        task_id: task.id.clone(),
        agent_id: agent.id.clone(),
        capability_id: capability.id.clone(),
        mode: capability.interaction_mode,
        args,
        prompt: None,
        status: ExecutionStatus::Queued,
        worker_id: None,
        pid: None,
        tmux_session: None,
        session_ref: request.session_ref,
        parent_execution_id: request.parent_execution_id.map(ExecutionId::new),
        created_at_ms: now_ms,
        started_at_ms: None,
        ended_at_ms: None,
        heartbeat_at_ms: None,
        exit_code: None,
        log_path: None,
        log_byte_size: 0,
        log_line_count: 0,
        usage: ExecutionUsage::default(),
        cli_flags: request.cli_flags,
        reason: None,
    };
    let execution_id = execution.id.clone();

    store.create_execution(execution)?;
    store.enqueue(QueueName::ExecuteCapability, execution_id.as_str(), now_ms)?;
    store.record_task_event(TaskEvent {
        task_id: task.id,
        actor: "api".to_string(),
        kind: "execution_created".to_string(),
        payload: serde_json::json!({
            "execution_id": execution_id,
            "capability": capability.key,
        }),
        at_ms: now_ms,
    })?;

    Ok(execution_id)
}

/// Two-phase cancel: `queued → cancelled`, `running → cancelling`.
/// A second call conflicts; the caller maps that to 409.
pub fn cancel_execution<C: Clock>(
    store: &Store,
    clock: &C,
    execution_id: &str,
) -> Result<ExecutionStatus, CoreError> {
    Ok(store.request_execution_cancel(execution_id, clock.epoch_ms())?)
}

/// Drop one inbound message for a running execution.
pub fn post_message<C: Clock>(
    store: &Store,
    config: &RunnerConfig,
    clock: &C,
    execution_id: &str,
    text: &str,
) -> Result<(), CoreError> {
    let status = store
        .read(|state| state.executions.get(execution_id).map(|e| e.status))
        .ok_or_else(|| CoreError::NotFound(format!("execution not found: {execution_id}")))?;
    if status != ExecutionStatus::Running {
        return Err(CoreError::Conflict(format!(
            "execution {execution_id} is {status}, not running"
        )));
    }

    let dir = messages::message_dir(&config.message_root, execution_id);
    messages::drop_message(&dir, clock.epoch_ms(), text)
        .map_err(|e| CoreError::Internal(e.to_string()))?;
    Ok(())
}

/// Validate and create a session, then enqueue it on `run-session`.
pub fn create_session<C: Clock>(
    store: &Store,
    config: &RunnerConfig,
    clock: &C,
    ids: &impl IdGen,
    request: SessionRequest,
) -> Result<SessionId, CoreError> {
    let (task, capability, agent) = load_target(store, &request.task_id, &request.capability_id)?;
    if !agent.active {
        return Err(CoreError::Conflict(format!(
            "agent {} is inactive",
            agent.id
        )));
    }
    if capability.interaction_mode != InteractionMode::Prompt {
        return Err(CoreError::Validation(
            "sessions require a prompt-mode capability".to_string(),
        ));
    }
    safety::validate_binary(&agent.binary_path).map_err(CoreError::from)?;
    safety::validate_working_dir(&agent.default_working_dir, &config.allowed_working_dirs)
        .map_err(CoreError::from)?;

    let now_ms = clock.epoch_ms();
    let session = Session {
        id: SessionId::new(ids.next()),
        task_id: task.id.clone(),
        agent_id: agent.id.clone(),
        capability_id: capability.id.clone(),
        status: SessionStatus::Starting,
        initial_prompt: request.initial_prompt,
        permission_mode: request.permission_mode,
        resume_ref: None,
        team: request.team,
        worker_id: None,
        pid: None,
        log_path: None,
        created_at_ms: now_ms,
        heartbeat_at_ms: None,
        ended_at_ms: None,
    };
    let session_id = session.id.clone();

    store.create_session(session)?;
    store.enqueue(QueueName::RunSession, session_id.as_str(), now_ms)?;
    store.record_task_event(TaskEvent {
        task_id: task.id,
        actor: "api".to_string(),
        kind: "session_created".to_string(),
        payload: serde_json::json!({ "session_id": session_id }),
        at_ms: now_ms,
    })?;

    Ok(session_id)
}

fn load_target(
    store: &Store,
    task_id: &str,
    capability_id: &str,
) -> Result<(Task, Capability, agendo_core::Agent), CoreError> {
    store.read(|state| {
        let task = state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("task not found: {task_id}")))?;
        let capability = state
            .capabilities
            .get(capability_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::NotFound(format!("capability not found: {capability_id}"))
            })?;
        let agent = state
            .agents
            .get(capability.agent_id.as_str())
            .cloned()
            .ok_or_else(|| {
                CoreError::NotFound(format!("agent not found: {}", capability.agent_id))
            })?;
        Ok((task, capability, agent))
    })
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
