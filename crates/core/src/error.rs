// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core error taxonomy.
//!
//! Services raise typed errors; the daemon boundary maps each variant to a
//! protocol error code exactly once. Internal detail never leaves the
//! boundary; only the one-line message does.

use thiserror::Error;

/// Typed errors raised by the execution core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Input failed schema or pattern validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// State-machine violation, concurrent update collision, or a
    /// concurrency cap was exceeded.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Working directory outside the allow-list, binary not executable,
    /// or an argument contained unsafe characters.
    #[error("safety violation: {0}")]
    Safety(String),

    /// Wall-clock exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Anything else. The message is for operators, not clients.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable code for the protocol envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::Validation(_) => "validation",
            CoreError::Conflict(_) => "conflict",
            CoreError::Safety(_) => "safety",
            CoreError::Timeout(_) => "timeout",
            CoreError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
