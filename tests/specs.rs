//! Behavioral specifications for the Agendo execution core.
//!
//! These run a daemon in-process (store, worker pool, socket listener)
//! and drive it through the wire protocol, with real child processes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

#[path = "specs/prelude.rs"]
mod prelude;

#[path = "specs/execution.rs"]
mod execution;

#[path = "specs/cancel.rs"]
mod cancel;

#[path = "specs/limits.rs"]
mod limits;

#[path = "specs/resume.rs"]
mod resume;

#[path = "specs/safety.rs"]
mod safety;

#[path = "specs/stream.rs"]
mod stream;
