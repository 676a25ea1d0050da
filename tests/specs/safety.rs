//! Safety checks at the creation boundary.

use crate::prelude::*;
use agendo_core::test_support::TaskBuilder;
use agendo_core::InputContext;
use agendo_daemon::protocol::{Request, Response};

#[tokio::test(flavor = "multi_thread")]
async fn symlink_traversal_is_rejected_without_a_record() {
    let harness = Harness::start().await;
    harness.seed_template(&["echo", "hi"], 5, 1024).await;

    // A task whose working dir symlinks out of the allow-list
    let outside = tempfile::tempdir().unwrap();
    let link = harness.workdir().join("symlink_to_outside");
    std::os::unix::fs::symlink(outside.path(), &link).unwrap();
    let task = TaskBuilder::default()
        .id("task-sneaky")
        .input_context(InputContext {
            working_dir: Some(link),
            ..Default::default()
        })
        .build();
    assert_eq!(
        harness.request(Request::CreateTask { task }).await,
        Response::Ok
    );

    let response = harness
        .request(Request::CreateExecution {
            task_id: "task-sneaky".to_string(),
            capability_id: "cap-1".to_string(),
            args: Default::default(),
            parent_execution_id: None,
            session_ref: None,
            cli_flags: vec![],
        })
        .await;
    let Response::Error { code, .. } = response else {
        panic!("expected safety error");
    };
    assert_eq!(code, "safety");

    // No execution record exists and nothing was enqueued
    let Response::Status { status } = harness.request(Request::Status).await else {
        panic!("expected status");
    };
    assert_eq!(status.queued_jobs, 0);
    assert_eq!(status.running_executions, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unsafe_template_arguments_are_rejected() {
    let harness = Harness::start().await;
    harness.seed_template(&["echo", "{{msg}}"], 5, 1024).await;

    let response = harness
        .request(Request::CreateExecution {
            task_id: "task-1".to_string(),
            capability_id: "cap-1".to_string(),
            args: [("msg".to_string(), serde_json::json!("$(rm -rf /)"))].into(),
            parent_execution_id: None,
            session_ref: None,
            cli_flags: vec![],
        })
        .await;
    let Response::Error { code, .. } = response else {
        panic!("expected safety error");
    };
    assert_eq!(code, "safety");
}

#[tokio::test(flavor = "multi_thread")]
async fn object_arguments_are_rejected_as_validation() {
    let harness = Harness::start().await;
    harness.seed_template(&["echo", "{{msg}}"], 5, 1024).await;

    let response = harness
        .request(Request::CreateExecution {
            task_id: "task-1".to_string(),
            capability_id: "cap-1".to_string(),
            args: [("msg".to_string(), serde_json::json!(["a", "b"]))].into(),
            parent_execution_id: None,
            session_ref: None,
            cli_flags: vec![],
        })
        .await;
    let Response::Error { code, .. } = response else {
        panic!("expected validation error");
    };
    assert_eq!(code, "validation");
}
