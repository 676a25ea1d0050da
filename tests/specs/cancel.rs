//! Two-phase cancellation.

use crate::prelude::*;
use agendo_core::ExecutionStatus;
use agendo_daemon::protocol::{Request, Response};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn cancel_while_running_finishes_cancelled() {
    let harness = Harness::start().await;
    harness.seed_template(&["sleep", "30"], 60, 1024 * 1024).await;
    let id = harness.create_execution(&[]).await;

    // Wait for the runner to claim it
    let deadline = tokio::time::Instant::now() + SPEC_WAIT_MAX;
    loop {
        let execution = harness.get_execution(&id).await.unwrap();
        if execution.status == ExecutionStatus::Running {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "never started");
        tokio::time::sleep(SPEC_POLL_INTERVAL).await;
    }

    let response = harness
        .request(Request::CancelExecution { id: id.clone() })
        .await;
    assert_eq!(
        response,
        Response::CancelAccepted {
            status: "cancelling".to_string()
        }
    );

    let start = tokio::time::Instant::now();
    let execution = harness.wait_terminal(&id).await;
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.exit_code.is_none());
    assert!(
        start.elapsed() < Duration::from_secs(6),
        "cancellation took too long"
    );

    // The second cancel is a conflict (the first already won)
    let second = harness.request(Request::CancelExecution { id }).await;
    let Response::Error { code, .. } = second else {
        panic!("expected conflict, got {second:?}");
    };
    assert_eq!(code, "conflict");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_while_queued_never_spawns() {
    let harness = Harness::start().await;
    // An inactive agent would reject creation, so park the job instead by
    // cancelling immediately after create; the claim then skips it.
    harness.seed_template(&["sleep", "30"], 60, 1024 * 1024).await;
    let id = harness.create_execution(&[]).await;

    let response = harness
        .request(Request::CancelExecution { id: id.clone() })
        .await;
    // Either it was still queued (cancelled directly) or the worker had
    // already claimed it (cancelling); both must end in cancelled
    match response {
        Response::CancelAccepted { status } => {
            assert!(status == "cancelled" || status == "cancelling");
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let execution = harness.wait_terminal(&id).await;
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
}
