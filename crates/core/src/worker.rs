// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker identity and liveness.

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a worker process (claim attribution).
    pub struct WorkerId;
}

/// Per-worker liveness row, upserted by the heartbeat loop.
/// Single-writer per worker id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub last_seen_at_ms: u64,
    /// Executions currently held by this worker.
    #[serde(default)]
    pub running_executions: u32,
    /// Sessions currently held by this worker.
    #[serde(default)]
    pub running_sessions: u32,
}
