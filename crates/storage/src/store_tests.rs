// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use agendo_core::test_support::{
    AgentBuilder, CapabilityBuilder, ExecutionBuilder, SessionBuilder, TaskBuilder,
};
use std::path::PathBuf;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> Store {
    Store::open(
        &dir.path().join("wal").join("events.wal"),
        &dir.path().join("snapshot.bin"),
    )
    .unwrap()
}

fn seeded_store(dir: &TempDir) -> Store {
    let store = open_store(dir);
    store
        .register_agent(AgentBuilder::default().id("a1").max_concurrent(2).build())
        .unwrap();
    store
        .register_capability(CapabilityBuilder::default().id("c1").agent_id("a1").build())
        .unwrap();
    store
        .create_task(TaskBuilder::default().id("t1").build())
        .unwrap();
    store
}

fn worker() -> WorkerId {
    WorkerId::new("worker-1")
}

fn create_running_execution(store: &Store, id: &str) {
    store
        .create_execution(ExecutionBuilder::default().id(id).build())
        .unwrap();
    store
        .start_execution(id, &worker(), &PathBuf::from("/tmp/log"), 1_000)
        .unwrap();
}

#[test]
fn start_execution_claims_queued_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    store
        .create_execution(ExecutionBuilder::default().id("e1").build())
        .unwrap();

    let exec = store
        .start_execution("e1", &worker(), &PathBuf::from("/tmp/log"), 1_000)
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Running);
    assert_eq!(exec.started_at_ms, Some(1_000));
    assert_eq!(exec.worker_id, Some(worker()));
}

#[test]
fn start_execution_allows_same_worker_reclaim() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    create_running_execution(&store, "e1");

    // Retry after a mid-run crash of the handler
    let exec = store
        .start_execution("e1", &worker(), &PathBuf::from("/tmp/log"), 2_000)
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Running);
    // First start time is preserved
    assert_eq!(exec.started_at_ms, Some(1_000));

    // A different worker cannot steal the claim
    let err = store
        .start_execution("e1", &WorkerId::new("other"), &PathBuf::from("/tmp/log"), 3_000)
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[test]
fn finalize_writes_requested_status_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    create_running_execution(&store, "e1");

    let outcome = store
        .finalize_execution(
            "e1",
            ExecutionStatus::Succeeded,
            Some(0),
            None,
            Default::default(),
            5_000,
        )
        .unwrap();
    assert_eq!(outcome, FinalizeOutcome::Finalized(ExecutionStatus::Succeeded));
    store.read(|state| {
        let exec = &state.executions["e1"];
        assert_eq!(exec.status, ExecutionStatus::Succeeded);
        assert_eq!(exec.exit_code, Some(0));
        assert_eq!(exec.ended_at_ms, Some(5_000));
    });
}

#[test]
fn finalize_race_guard_preserves_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    create_running_execution(&store, "e1");

    // Cancel lands between the child's exit and the runner's finalise
    assert_eq!(
        store.request_execution_cancel("e1", 2_000).unwrap(),
        ExecutionStatus::Cancelling
    );

    let outcome = store
        .finalize_execution(
            "e1",
            ExecutionStatus::Succeeded,
            Some(0),
            None,
            Default::default(),
            5_000,
        )
        .unwrap();
    assert_eq!(outcome, FinalizeOutcome::CancelledInstead);
    store.read(|state| {
        assert_eq!(state.executions["e1"].status, ExecutionStatus::Cancelled);
    });
}

#[test]
fn finalize_twice_leaves_terminal_row_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    create_running_execution(&store, "e1");

    store
        .finalize_execution("e1", ExecutionStatus::Failed, Some(1), None, Default::default(), 5_000)
        .unwrap();
    let outcome = store
        .finalize_execution(
            "e1",
            ExecutionStatus::Succeeded,
            Some(0),
            None,
            Default::default(),
            6_000,
        )
        .unwrap();
    assert_eq!(
        outcome,
        FinalizeOutcome::AlreadyTerminal(ExecutionStatus::Failed)
    );
    store.read(|state| {
        assert_eq!(state.executions["e1"].ended_at_ms, Some(5_000));
    });
}

#[test]
fn cancel_twice_conflicts_the_second_time() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    create_running_execution(&store, "e1");

    assert_eq!(
        store.request_execution_cancel("e1", 2_000).unwrap(),
        ExecutionStatus::Cancelling
    );
    let err = store.request_execution_cancel("e1", 2_100).unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[test]
fn cancel_queued_execution_is_immediate() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    store
        .create_execution(ExecutionBuilder::default().id("e1").build())
        .unwrap();

    assert_eq!(
        store.request_execution_cancel("e1", 2_000).unwrap(),
        ExecutionStatus::Cancelled
    );
}

#[test]
fn concurrency_cap_rejects_excess_executions() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    store
        .create_execution(ExecutionBuilder::default().id("e1").build())
        .unwrap();
    store
        .create_execution(ExecutionBuilder::default().id("e2").build())
        .unwrap();

    let err = store
        .create_execution(ExecutionBuilder::default().id("e3").build())
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    // A finished execution frees its slot
    store
        .start_execution("e1", &worker(), &PathBuf::from("/tmp/log"), 1_000)
        .unwrap();
    store
        .finalize_execution("e1", ExecutionStatus::Succeeded, Some(0), None, Default::default(), 2_000)
        .unwrap();
    store
        .create_execution(ExecutionBuilder::default().id("e3").build())
        .unwrap();
}

#[test]
fn reap_stale_executions_matches_only_overdue_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    create_running_execution(&store, "e1");
    create_running_execution(&store, "e2");
    store.execution_heartbeat("e2", 100_000).unwrap();

    let reaped = store.reap_stale_executions(30_000, 100_000).unwrap();
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].id.as_str(), "e1");
    store.read(|state| {
        let exec = &state.executions["e1"];
        assert_eq!(exec.status, ExecutionStatus::TimedOut);
        assert_eq!(
            exec.reason.as_deref(),
            Some("heartbeat lost — worker stale")
        );
        assert_eq!(state.executions["e2"].status, ExecutionStatus::Running);
    });
}

#[test]
fn reap_stale_sessions_parks_at_idle() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    store
        .create_session(
            SessionBuilder::default()
                .id("s1")
                .status(agendo_core::SessionStatus::Active)
                .build(),
        )
        .unwrap();
    store
        .start_session("s1", &worker(), 42, &PathBuf::from("/tmp/log"), 1_000)
        .unwrap();

    let reaped = store.reap_stale_sessions(30_000, 100_000).unwrap();
    assert_eq!(reaped.len(), 1);
    store.read(|state| {
        assert_eq!(state.sessions["s1"].status, agendo_core::SessionStatus::Idle);
    });

    // Parked rows are not live; the next pass matches nothing
    let reaped = store.reap_stale_sessions(30_000, 100_000).unwrap();
    assert!(reaped.is_empty());
}

#[test]
fn transition_task_enforces_state_machine() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);

    store.transition_task("t1", TaskStatus::InProgress).unwrap();
    store.transition_task("t1", TaskStatus::Blocked).unwrap();
    let err = store.transition_task("t1", TaskStatus::Done).unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[test]
fn state_survives_reopen_via_wal_replay() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = seeded_store(&dir);
        create_running_execution(&store, "e1");
        store.flush().unwrap();
    }

    let store = open_store(&dir);
    store.read(|state| {
        assert_eq!(state.executions["e1"].status, ExecutionStatus::Running);
        assert!(state.agents.contains_key("a1"));
    });
}

#[test]
fn checkpoint_truncates_wal_and_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = seeded_store(&dir);
        create_running_execution(&store, "e1");
        store.checkpoint().unwrap();
        // Post-checkpoint mutations land in the fresh WAL tail
        store
            .finalize_execution("e1", ExecutionStatus::Succeeded, Some(0), None, Default::default(), 9_000)
            .unwrap();
        store.flush().unwrap();
    }

    let store = open_store(&dir);
    store.read(|state| {
        assert_eq!(state.executions["e1"].status, ExecutionStatus::Succeeded);
    });
}

#[test]
fn zombie_queries_filter_by_worker_and_liveness() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    create_running_execution(&store, "e1");
    store
        .create_execution(ExecutionBuilder::default().id("e2").agent_id("a1").build())
        .unwrap();

    let owned = store.executions_owned_by(&worker());
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].id.as_str(), "e1");
    assert!(store.executions_owned_by(&WorkerId::new("other")).is_empty());
}
