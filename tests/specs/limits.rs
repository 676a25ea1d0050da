//! Output accounting and the byte limit.

use crate::prelude::*;
use agendo_core::ExecutionStatus;

#[tokio::test(flavor = "multi_thread")]
async fn output_limit_fails_the_execution() {
    let harness = Harness::start().await;
    harness.seed_template(&["yes"], 30, 4096).await;

    let id = harness.create_execution(&[]).await;
    let execution = harness.wait_terminal(&id).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.reason.as_deref(), Some("output limit exceeded"));
    assert!(execution.log_byte_size > 4096);

    let log = harness.read_log(&execution);
    assert!(log.contains("[system] Output limit exceeded. Terminating."));
}

#[tokio::test(flavor = "multi_thread")]
async fn log_accounting_matches_the_file() {
    let harness = Harness::start().await;
    harness
        .seed_template(&["echo", "{{msg}}"], 5, 1024 * 1024)
        .await;

    let id = harness.create_execution(&[("msg", "accounted")]).await;
    let execution = harness.wait_terminal(&id).await;

    let log = harness.read_log(&execution);
    assert_eq!(execution.log_byte_size, log.len() as u64);
    assert_eq!(
        execution.log_line_count,
        log.lines().count() as u64
    );
}
