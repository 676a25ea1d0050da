// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use agendo_core::test_support::{AgentBuilder, ExecutionBuilder};
use agendo_core::{ExecutionId, TaskId};

fn state_with_execution(id: &str, status: ExecutionStatus) -> MaterializedState {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::ExecutionCreated {
        execution: ExecutionBuilder::default().id(id).status(status).build(),
    });
    state
}

#[test]
fn cancel_request_on_queued_cancels_directly() {
    let mut state = state_with_execution("e1", ExecutionStatus::Queued);
    state.apply_event(&Event::ExecutionCancelRequested {
        id: ExecutionId::new("e1"),
        at_ms: 2_000,
    });
    let exec = &state.executions["e1"];
    assert_eq!(exec.status, ExecutionStatus::Cancelled);
    assert_eq!(exec.ended_at_ms, Some(2_000));
    assert_eq!(exec.reason.as_deref(), Some("cancelled before start"));
}

#[test]
fn cancel_request_on_running_parks_at_cancelling() {
    let mut state = state_with_execution("e1", ExecutionStatus::Running);
    state.apply_event(&Event::ExecutionCancelRequested {
        id: ExecutionId::new("e1"),
        at_ms: 2_000,
    });
    assert_eq!(state.executions["e1"].status, ExecutionStatus::Cancelling);
}

#[test]
fn cancel_request_on_terminal_is_a_no_op() {
    let mut state = state_with_execution("e1", ExecutionStatus::Succeeded);
    state.apply_event(&Event::ExecutionCancelRequested {
        id: ExecutionId::new("e1"),
        at_ms: 2_000,
    });
    assert_eq!(state.executions["e1"].status, ExecutionStatus::Succeeded);
}

#[test]
fn heartbeat_does_not_touch_terminal_executions() {
    let mut state = state_with_execution("e1", ExecutionStatus::Failed);
    state.apply_event(&Event::ExecutionHeartbeat {
        id: ExecutionId::new("e1"),
        at_ms: 9_000,
    });
    assert_eq!(state.executions["e1"].heartbeat_at_ms, None);
}

#[test]
fn session_ref_first_extraction_wins() {
    let mut state = state_with_execution("e1", ExecutionStatus::Running);
    state.apply_event(&Event::ExecutionSessionRef {
        id: ExecutionId::new("e1"),
        session_ref: "abc".to_string(),
    });
    state.apply_event(&Event::ExecutionSessionRef {
        id: ExecutionId::new("e1"),
        session_ref: "def".to_string(),
    });
    assert_eq!(state.executions["e1"].session_ref.as_deref(), Some("abc"));
}

#[test]
fn applying_the_same_event_twice_is_idempotent() {
    let mut once = state_with_execution("e1", ExecutionStatus::Running);
    let finished = Event::ExecutionFinished {
        id: ExecutionId::new("e1"),
        status: ExecutionStatus::Succeeded,
        exit_code: Some(0),
        reason: None,
        ended_at_ms: 5_000,
        usage: Default::default(),
    };
    once.apply_event(&finished);
    let mut twice = once.clone();
    twice.apply_event(&finished);
    assert_eq!(once.executions["e1"], twice.executions["e1"]);
}

#[test]
fn task_event_append_is_deduplicated() {
    let mut state = MaterializedState::default();
    let entry = agendo_core::TaskEvent {
        task_id: TaskId::new("t1"),
        actor: "api".to_string(),
        kind: "execution_created".to_string(),
        payload: serde_json::Value::Null,
        at_ms: 1_000,
    };
    let event = Event::TaskEventRecorded { entry };
    state.apply_event(&event);
    state.apply_event(&event);
    assert_eq!(state.task_events["t1"].len(), 1);
}

#[test]
fn agent_load_counts_live_statuses_only() {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::AgentRegistered {
        agent: AgentBuilder::default().id("a1").build(),
    });
    for (id, status) in [
        ("e1", ExecutionStatus::Queued),
        ("e2", ExecutionStatus::Running),
        ("e3", ExecutionStatus::Cancelling),
        ("e4", ExecutionStatus::Succeeded),
        ("e5", ExecutionStatus::Failed),
    ] {
        state.apply_event(&Event::ExecutionCreated {
            execution: ExecutionBuilder::default()
                .id(id)
                .agent_id("a1")
                .status(status)
                .build(),
        });
    }
    assert_eq!(state.agent_load("a1"), 3);
}

#[test]
fn prefix_lookup_requires_unambiguous_match() {
    let mut state = MaterializedState::default();
    for id in ["abc-123", "abd-456"] {
        state.apply_event(&Event::ExecutionCreated {
            execution: ExecutionBuilder::default().id(id).build(),
        });
    }
    assert!(state.get_execution("abc").is_some());
    assert!(state.get_execution("ab").is_none());
    assert!(state.get_execution("abc-123").is_some());
}
