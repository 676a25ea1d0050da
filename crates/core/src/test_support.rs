// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders with test defaults for other crates' tests.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::path::PathBuf;

use crate::agent::{Agent, AgentId};
use crate::capability::{ArgsSchema, Capability, CapabilityId, InteractionMode};
use crate::execution::{Execution, ExecutionId, ExecutionStatus, ExecutionUsage};
use crate::session::{Session, SessionId, SessionStatus};
use crate::task::{InputContext, Task, TaskId, TaskStatus};

/// Build an [`Agent`] with test defaults.
pub struct AgentBuilder {
    agent: Agent,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self {
            agent: Agent {
                id: AgentId::new("agent-1"),
                name: "Test Agent".to_string(),
                binary_path: PathBuf::from("/bin/echo"),
                default_working_dir: PathBuf::from("/tmp"),
                env_allowlist: vec![],
                max_concurrent: 3,
                active: true,
            },
        }
    }
}

impl AgentBuilder {
    pub fn id(mut self, id: &str) -> Self {
        self.agent.id = AgentId::new(id);
        self
    }

    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.agent.binary_path = path.into();
        self
    }

    pub fn default_working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.agent.default_working_dir = path.into();
        self
    }

    pub fn max_concurrent(mut self, n: u32) -> Self {
        self.agent.max_concurrent = n;
        self
    }

    pub fn env_allowlist(mut self, vars: &[&str]) -> Self {
        self.agent.env_allowlist = vars.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.agent.active = false;
        self
    }

    pub fn build(self) -> Agent {
        self.agent
    }
}

/// Build a [`Capability`] with test defaults (template mode, `echo {{msg}}`).
pub struct CapabilityBuilder {
    capability: Capability,
}

impl Default for CapabilityBuilder {
    fn default() -> Self {
        Self {
            capability: Capability {
                id: CapabilityId::new("cap-1"),
                agent_id: AgentId::new("agent-1"),
                key: "echo-msg".to_string(),
                interaction_mode: InteractionMode::Template,
                command_tokens: vec!["echo".to_string(), "{{msg}}".to_string()],
                prompt_template: None,
                args_schema: ArgsSchema::default(),
                danger_level: 0,
                timeout_sec: 5,
                max_output_bytes: 1024 * 1024,
            },
        }
    }
}

impl CapabilityBuilder {
    pub fn id(mut self, id: &str) -> Self {
        self.capability.id = CapabilityId::new(id);
        self
    }

    pub fn agent_id(mut self, id: &str) -> Self {
        self.capability.agent_id = AgentId::new(id);
        self
    }

    pub fn command_tokens(mut self, tokens: &[&str]) -> Self {
        self.capability.command_tokens = tokens.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn prompt(mut self, template: &str) -> Self {
        self.capability.interaction_mode = InteractionMode::Prompt;
        self.capability.command_tokens = vec![];
        self.capability.prompt_template = Some(template.to_string());
        self
    }

    pub fn args_schema(mut self, schema: ArgsSchema) -> Self {
        self.capability.args_schema = schema;
        self
    }

    pub fn timeout_sec(mut self, secs: u64) -> Self {
        self.capability.timeout_sec = secs;
        self
    }

    pub fn max_output_bytes(mut self, bytes: u64) -> Self {
        self.capability.max_output_bytes = bytes;
        self
    }

    pub fn build(self) -> Capability {
        self.capability
    }
}

/// Build a [`Task`] with test defaults.
pub struct TaskBuilder {
    task: Task,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self {
            task: Task {
                id: TaskId::new("task-1"),
                title: "Test task".to_string(),
                description: "A task used in tests".to_string(),
                status: TaskStatus::Todo,
                sort_key: 100.0,
                input_context: InputContext::default(),
            },
        }
    }
}

impl TaskBuilder {
    pub fn id(mut self, id: &str) -> Self {
        self.task.id = TaskId::new(id);
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.task.title = title.to_string();
        self
    }

    pub fn input_context(mut self, ctx: InputContext) -> Self {
        self.task.input_context = ctx;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Build an [`Execution`] with test defaults.
pub struct ExecutionBuilder {
    execution: Execution,
}

impl Default for ExecutionBuilder {
    fn default() -> Self {
        Self {
            execution: Execution {
                id: ExecutionId::new("exec-1"),
                task_id: TaskId::new("task-1"),
                agent_id: AgentId::new("agent-1"),
                capability_id: CapabilityId::new("cap-1"),
                mode: InteractionMode::Template,
                args: HashMap::new(),
                prompt: None,
                status: ExecutionStatus::Queued,
                worker_id: None,
                pid: None,
                tmux_session: None,
                session_ref: None,
                parent_execution_id: None,
                created_at_ms: 1_000_000,
                started_at_ms: None,
                ended_at_ms: None,
                heartbeat_at_ms: None,
                exit_code: None,
                log_path: None,
                log_byte_size: 0,
                log_line_count: 0,
                usage: ExecutionUsage::default(),
                cli_flags: vec![],
                reason: None,
            },
        }
    }
}

impl ExecutionBuilder {
    pub fn id(mut self, id: &str) -> Self {
        self.execution.id = ExecutionId::new(id);
        self
    }

    pub fn task_id(mut self, id: &str) -> Self {
        self.execution.task_id = TaskId::new(id);
        self
    }

    pub fn agent_id(mut self, id: &str) -> Self {
        self.execution.agent_id = AgentId::new(id);
        self
    }

    pub fn capability_id(mut self, id: &str) -> Self {
        self.execution.capability_id = CapabilityId::new(id);
        self
    }

    pub fn mode(mut self, mode: InteractionMode) -> Self {
        self.execution.mode = mode;
        self
    }

    pub fn status(mut self, status: ExecutionStatus) -> Self {
        self.execution.status = status;
        self
    }

    pub fn arg(mut self, key: &str, value: &str) -> Self {
        self.execution.args.insert(key.to_string(), value.to_string());
        self
    }

    pub fn parent(mut self, id: &str, session_ref: &str) -> Self {
        self.execution.parent_execution_id = Some(ExecutionId::new(id));
        self.execution.session_ref = Some(session_ref.to_string());
        self
    }

    pub fn build(self) -> Execution {
        self.execution
    }
}

/// Build a [`Session`] with test defaults.
pub struct SessionBuilder {
    session: Session,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            session: Session {
                id: SessionId::new("sess-1"),
                task_id: TaskId::new("task-1"),
                agent_id: AgentId::new("agent-1"),
                capability_id: CapabilityId::new("cap-1"),
                status: SessionStatus::Starting,
                initial_prompt: "Hello".to_string(),
                permission_mode: None,
                resume_ref: None,
                team: None,
                worker_id: None,
                pid: None,
                log_path: None,
                created_at_ms: 1_000_000,
                heartbeat_at_ms: None,
                ended_at_ms: None,
            },
        }
    }
}

impl SessionBuilder {
    pub fn id(mut self, id: &str) -> Self {
        self.session.id = SessionId::new(id);
        self
    }

    pub fn capability_id(mut self, id: &str) -> Self {
        self.session.capability_id = CapabilityId::new(id);
        self
    }

    pub fn agent_id(mut self, id: &str) -> Self {
        self.session.agent_id = AgentId::new(id);
        self
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.session.status = status;
        self
    }

    pub fn resume_ref(mut self, session_ref: &str) -> Self {
        self.session.resume_ref = Some(session_ref.to_string());
        self
    }

    pub fn team(mut self, team: &str) -> Self {
        self.session.team = Some(team.to_string());
        self
    }

    pub fn build(self) -> Session {
        self.session
    }
}
