// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable queue jobs and per-queue policies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::worker::WorkerId;

crate::define_id! {
    /// Unique identifier for a queue job.
    pub struct QueueJobId;
}

/// The two queues the core consumes. Handlers are leaf consumers; they
/// never enqueue sibling jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    /// One-shot capability runs.
    ExecuteCapability,
    /// Multi-hour sessions.
    RunSession,
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueName::ExecuteCapability => write!(f, "execute-capability"),
            QueueName::RunSession => write!(f, "run-session"),
        }
    }
}

/// Per-queue delivery policy.
#[derive(Debug, Clone, Copy)]
pub struct QueueSpec {
    /// Safety net for hung handlers: an active claim older than this is
    /// released back to pending (or dead once retries are spent).
    pub expire_after: Duration,
    /// Retries after the first failed attempt.
    pub retry_limit: u32,
    /// Delay before a failed job becomes claimable again.
    pub retry_backoff: Duration,
}

impl QueueName {
    pub fn spec(self) -> QueueSpec {
        match self {
            QueueName::ExecuteCapability => QueueSpec {
                expire_after: Duration::from_secs(45 * 60),
                retry_limit: 2,
                retry_backoff: Duration::from_secs(30),
            },
            QueueName::RunSession => QueueSpec {
                expire_after: Duration::from_secs(8 * 60 * 60),
                retry_limit: 1,
                retry_backoff: Duration::from_secs(30),
            },
        }
    }
}

/// Claim status of a queue job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueJobStatus {
    Pending,
    Active,
    Completed,
    Failed,
    /// Retries exhausted; finalisation is left to the stale reaper or the
    /// zombie reconciler, not a dead-letter consumer.
    Dead,
}

impl fmt::Display for QueueJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueJobStatus::Pending => write!(f, "pending"),
            QueueJobStatus::Active => write!(f, "active"),
            QueueJobStatus::Completed => write!(f, "completed"),
            QueueJobStatus::Failed => write!(f, "failed"),
            QueueJobStatus::Dead => write!(f, "dead"),
        }
    }
}

/// A durably stored unit of queue work.
///
/// The payload is the id of the execution or session to run; jobs carry no
/// other data so a replayed claim always re-reads fresh records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: QueueJobId,
    pub queue: QueueName,
    /// Execution or session id, depending on the queue.
    pub payload: String,
    pub status: QueueJobStatus,
    /// Completed attempts (claims that failed or expired).
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at_ms: u64,
    /// Earliest claimable time (retry backoff).
    #[serde(default)]
    pub available_at_ms: u64,
    /// Claim expiration deadline while active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<WorkerId>,
}

impl QueueJob {
    /// Whether the job can be claimed at `now_ms`.
    pub fn claimable(&self, now_ms: u64) -> bool {
        self.status == QueueJobStatus::Pending && self.available_at_ms <= now_ms
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
