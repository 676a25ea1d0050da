// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! agendo-storage: durable event-sourced store for the execution core.
//!
//! WAL + snapshot on disk, materialized state in memory, guarded
//! (compare-and-swap) transitions behind one lock.

mod queue;
mod snapshot;
mod state;
mod store;
mod wal;

pub use snapshot::{Snapshot, SnapshotError};
pub use state::MaterializedState;
pub use store::{FinalizeOutcome, Store, StoreError};
pub use wal::{Wal, WalEntry, WalError};
