//! Prompt-mode resume: a continuation chain across two executions.

use crate::prelude::*;
use agendo_core::test_support::{AgentBuilder, CapabilityBuilder, TaskBuilder};
use agendo_core::ExecutionStatus;
use agendo_daemon::protocol::{Request, Response};

/// Speaks just enough stream-json to act as the agent on both legs: the
/// first run announces its session id and stays alive (so it can be
/// cancelled); a `--resume` run announces the same id and exits cleanly.
const CLAUDE_SHIM: &str = r#"#!/bin/sh
case "$*" in
  *--resume*)
    head -n 1 >/dev/null
    echo '{"type":"system","subtype":"init","session_id":"sess-e2e"}'
    exit 0
    ;;
  *)
    head -n 1 >/dev/null
    echo '{"type":"system","subtype":"init","session_id":"sess-e2e"}'
    exec sleep 30
    ;;
esac
"#;

#[tokio::test(flavor = "multi_thread")]
async fn prompt_mode_resume_continues_the_session() {
    let harness = Harness::start().await;
    let shim = harness.write_shim("claude", CLAUDE_SHIM);

    let agent = AgentBuilder::default()
        .id("agent-claude")
        .binary_path(&shim)
        .default_working_dir(harness.workdir())
        .build();
    assert_eq!(
        harness.request(Request::RegisterAgent { agent }).await,
        Response::Ok
    );
    let capability = CapabilityBuilder::default()
        .id("cap-claude")
        .agent_id("agent-claude")
        .prompt("Work on {{task_title}}")
        .timeout_sec(30)
        .build();
    assert_eq!(
        harness
            .request(Request::RegisterCapability { capability })
            .await,
        Response::Ok
    );
    let task = TaskBuilder::default().id("task-1").build();
    assert_eq!(harness.request(Request::CreateTask { task }).await, Response::Ok);

    // First leg: start the conversation and wait for the session id to
    // land on the record
    let first = match harness
        .request(Request::CreateExecution {
            task_id: "task-1".to_string(),
            capability_id: "cap-claude".to_string(),
            args: Default::default(),
            parent_execution_id: None,
            session_ref: None,
            cli_flags: vec![],
        })
        .await
    {
        Response::ExecutionCreated { id } => id,
        other => panic!("create failed: {other:?}"),
    };

    let deadline = tokio::time::Instant::now() + SPEC_WAIT_MAX;
    let session_ref = loop {
        let execution = harness.get_execution(&first).await.unwrap();
        if let Some(session_ref) = execution.session_ref {
            break session_ref;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "session id never extracted"
        );
        tokio::time::sleep(SPEC_POLL_INTERVAL).await;
    };
    assert_eq!(session_ref, "sess-e2e");

    let response = harness
        .request(Request::CancelExecution { id: first.clone() })
        .await;
    assert!(matches!(response, Response::CancelAccepted { .. }));
    let cancelled = harness.wait_terminal(&first).await;
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);

    // Second leg: a continuation with the parent and the stored session
    // reference goes through the resume path
    let second = match harness
        .request(Request::CreateExecution {
            task_id: "task-1".to_string(),
            capability_id: "cap-claude".to_string(),
            args: Default::default(),
            parent_execution_id: Some(first.clone()),
            session_ref: Some(session_ref.clone()),
            cli_flags: vec![],
        })
        .await
    {
        Response::ExecutionCreated { id } => id,
        other => panic!("resume create failed: {other:?}"),
    };

    let execution = harness.wait_terminal(&second).await;
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.session_ref.as_deref(), Some("sess-e2e"));
    assert_eq!(
        execution.parent_execution_id.as_ref().map(|p| p.as_str()),
        Some(first.as_str())
    );

    let log = harness.read_log(&execution);
    assert!(
        log.starts_with("[system] Resuming session: sess-e2e\n"),
        "log was: {log}"
    );
    // The resumed agent's first NDJSON line carries the same session id
    assert!(log.contains(r#"[stdout] {"type":"system","subtype":"init","session_id":"sess-e2e"}"#));
}
