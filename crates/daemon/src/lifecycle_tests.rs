// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::env::EnvMode;
use agendo_core::WorkerId;
use std::time::Duration as StdDuration;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> Config {
    let workdir = dir.path().join("work");
    std::fs::create_dir_all(&workdir).unwrap();
    Config {
        state_dir: dir.path().join("state"),
        worker_id: WorkerId::new("worker-test"),
        poll_interval: StdDuration::from_millis(50),
        max_concurrent_jobs: 2,
        log_dir: dir.path().join("logs"),
        stale_threshold: StdDuration::from_secs(120),
        heartbeat_interval: StdDuration::from_millis(100),
        allowed_working_dirs: vec![workdir.canonicalize().unwrap()],
        env_mode: EnvMode::Test,
        jwt_secret: None,
        message_root: dir.path().join("messages"),
        min_free_bytes: 0,
    }
}

#[tokio::test]
async fn startup_creates_socket_lock_and_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    let result = startup(config.clone()).await.unwrap();
    assert!(config.socket_path().exists());
    assert!(config.lock_path().exists());

    let pid: u32 = std::fs::read_to_string(config.lock_path())
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(pid, std::process::id());

    result.daemon.cleanup();
    assert!(!config.socket_path().exists());
    assert!(!config.lock_path().exists());
}

#[tokio::test]
async fn second_daemon_fails_to_lock() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    let _first = startup(config.clone()).await.unwrap();
    let err = startup(config).await.unwrap_err();
    assert!(matches!(err, LifecycleError::LockFailed(_)));
}

#[tokio::test]
async fn refuses_to_start_below_the_free_space_floor() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.min_free_bytes = u64::MAX;

    let err = startup(config).await.unwrap_err();
    assert!(matches!(err, LifecycleError::DiskSpace { .. }));
}

#[tokio::test]
async fn startup_replays_existing_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    {
        let result = startup(config.clone()).await.unwrap();
        result
            .daemon
            .store
            .register_agent(
                agendo_core::test_support::AgentBuilder::default()
                    .id("a1")
                    .build(),
            )
            .unwrap();
        result.daemon.store.flush().unwrap();
        result.daemon.cleanup();
    }

    let result = startup(config).await.unwrap();
    result
        .daemon
        .store
        .read(|state| assert!(state.agents.contains_key("a1")));
    result.daemon.cleanup();
}
