// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for runner tests.

#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use agendo_core::test_support::{AgentBuilder, CapabilityBuilder, TaskBuilder};
use agendo_core::{Capability, SystemClock, WorkerId};
use agendo_storage::Store;
use tempfile::TempDir;

use crate::execution::Runner;
use crate::RunnerConfig;

pub fn open_store(dir: &TempDir) -> Store {
    Store::open(
        &dir.path().join("state").join("events.wal"),
        &dir.path().join("state").join("snapshot.bin"),
    )
    .unwrap()
}

/// Fast intervals so tests finish quickly.
pub fn test_config(dir: &TempDir) -> RunnerConfig {
    let workdir = dir.path().join("work");
    std::fs::create_dir_all(&workdir).unwrap();
    RunnerConfig {
        worker_id: WorkerId::new("worker-test"),
        log_dir: dir.path().join("logs"),
        allowed_working_dirs: vec![workdir.canonicalize().unwrap()],
        message_root: dir.path().join("messages"),
        heartbeat_interval: Duration::from_millis(50),
        poll_interval: Duration::from_millis(50),
        grace_period: Duration::from_millis(500),
        session_idle_timeout: Duration::from_secs(60),
    }
}

/// Register an agent/capability/task triple and one queued execution.
pub fn seed_execution(
    store: &Store,
    config: &RunnerConfig,
    execution_id: &str,
    capability: Capability,
) {
    seed_registry(store, config, capability);
    store
        .create_execution(
            agendo_core::test_support::ExecutionBuilder::default()
                .id(execution_id)
                .build(),
        )
        .unwrap();
}

pub fn seed_registry(store: &Store, config: &RunnerConfig, capability: Capability) {
    let workdir = config.allowed_working_dirs[0].clone();
    let _ = store.register_agent(
        AgentBuilder::default()
            .id("agent-1")
            .binary_path("/bin/echo")
            .default_working_dir(workdir)
            .max_concurrent(10)
            .build(),
    );
    let _ = store.register_capability(capability);
    let _ = store.create_task(TaskBuilder::default().id("task-1").build());
}

pub fn template_capability(tokens: &[&str], timeout_sec: u64) -> Capability {
    CapabilityBuilder::default()
        .id("cap-1")
        .agent_id("agent-1")
        .command_tokens(tokens)
        .timeout_sec(timeout_sec)
        .build()
}

pub fn runner(store: &Store, config: &RunnerConfig) -> Runner<SystemClock> {
    Runner::new(store.clone(), config.clone(), SystemClock)
}

/// Write an executable shim script and return its path.
pub fn write_shim(dir: &Path, name: &str, script: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
