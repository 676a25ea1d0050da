//! One-shot template executions, end to end.

use crate::prelude::*;
use agendo_core::ExecutionStatus;
use agendo_daemon::protocol::{Request, Response};

#[tokio::test(flavor = "multi_thread")]
async fn template_success_end_to_end() {
    let harness = Harness::start().await;
    harness.seed_template(&["echo", "{{msg}}"], 5, 1024 * 1024).await;

    let id = harness.create_execution(&[("msg", "hello")]).await;
    let execution = harness.wait_terminal(&id).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.exit_code, Some(0));
    assert!(execution.started_at_ms.unwrap() <= execution.ended_at_ms.unwrap());
    assert_eq!(execution.log_line_count, 1);
    assert!(execution.log_byte_size > 0);

    let log = harness.read_log(&execution);
    assert_eq!(log, "[stdout] hello\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_is_enforced_with_sigterm_first() {
    let harness = Harness::start().await;
    harness.seed_template(&["sleep", "60"], 2, 1024 * 1024).await;

    let id = harness.create_execution(&[]).await;
    let execution = harness.wait_terminal(&id).await;

    assert_eq!(execution.status, ExecutionStatus::TimedOut);
    assert_eq!(execution.exit_code, None);
    let log = harness.read_log(&execution);
    assert!(
        log.contains("[system] Timeout after 2s. Sending SIGTERM."),
        "log was: {log}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_capability_is_not_found() {
    let harness = Harness::start().await;
    harness.seed_template(&["echo", "hi"], 5, 1024).await;

    let response = harness
        .request(Request::CreateExecution {
            task_id: "task-1".to_string(),
            capability_id: "ghost".to_string(),
            args: Default::default(),
            parent_execution_id: None,
            session_ref: None,
            cli_flags: vec![],
        })
        .await;
    let Response::Error { code, .. } = response else {
        panic!("expected error");
    };
    assert_eq!(code, "not_found");
}

#[tokio::test(flavor = "multi_thread")]
async fn executions_for_one_agent_respect_the_concurrency_cap() {
    let harness = Harness::start().await;
    // max_concurrent on the seeded agent is 10; tighten via a second agent
    harness.seed_template(&["sleep", "5"], 30, 1024 * 1024).await;
    let capped = agendo_core::test_support::AgentBuilder::default()
        .id("agent-capped")
        .default_working_dir(harness.workdir())
        .max_concurrent(1)
        .build();
    assert_eq!(
        harness
            .request(Request::RegisterAgent { agent: capped })
            .await,
        Response::Ok
    );
    let capability = agendo_core::test_support::CapabilityBuilder::default()
        .id("cap-capped")
        .agent_id("agent-capped")
        .command_tokens(&["sleep", "5"])
        .timeout_sec(30)
        .build();
    assert_eq!(
        harness
            .request(Request::RegisterCapability { capability })
            .await,
        Response::Ok
    );

    fn create() -> Request {
        Request::CreateExecution {
            task_id: "task-1".to_string(),
            capability_id: "cap-capped".to_string(),
            args: Default::default(),
            parent_execution_id: None,
            session_ref: None,
            cli_flags: vec![],
        }
    }

    let first = harness.request(create()).await;
    assert!(matches!(first, Response::ExecutionCreated { .. }));

    let second = harness.request(create()).await;
    let Response::Error { code, .. } = second else {
        panic!("expected conflict, got {second:?}");
    };
    assert_eq!(code, "conflict");
}
