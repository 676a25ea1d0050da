// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn execute_capability_policy() {
    let spec = QueueName::ExecuteCapability.spec();
    assert_eq!(spec.expire_after, Duration::from_secs(45 * 60));
    assert_eq!(spec.retry_limit, 2);
    assert_eq!(spec.retry_backoff, Duration::from_secs(30));
}

#[test]
fn run_session_policy() {
    let spec = QueueName::RunSession.spec();
    assert_eq!(spec.expire_after, Duration::from_secs(8 * 60 * 60));
    assert_eq!(spec.retry_limit, 1);
}

#[test]
fn queue_names_serialize_kebab_case() {
    assert_eq!(
        serde_json::to_string(&QueueName::ExecuteCapability).unwrap(),
        "\"execute-capability\""
    );
    assert_eq!(QueueName::RunSession.to_string(), "run-session");
}

#[test]
fn claimable_respects_status_and_backoff() {
    let job = QueueJob {
        id: QueueJobId::new("j1"),
        queue: QueueName::ExecuteCapability,
        payload: "e1".to_string(),
        status: QueueJobStatus::Pending,
        attempts: 0,
        enqueued_at_ms: 1_000,
        available_at_ms: 2_000,
        expires_at_ms: None,
        claimed_by: None,
    };
    assert!(!job.claimable(1_500));
    assert!(job.claimable(2_000));

    let active = QueueJob {
        status: QueueJobStatus::Active,
        ..job
    };
    assert!(!active.claimable(10_000));
}
