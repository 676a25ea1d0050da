// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner error types.

use agendo_core::CoreError;
use agendo_storage::StoreError;
use thiserror::Error;

/// Errors raised while orchestrating a run.
///
/// Only errors raised *before* finalisation propagate to the queue layer
/// (and are retried there); anything after the record has its terminal
/// status is swallowed at the handler boundary.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("safety violation: {0}")]
    Safety(String),
    #[error("adapter error: {0}")]
    Adapter(#[from] agendo_adapters::AdapterError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("log error: {0}")]
    Log(#[from] std::io::Error),
}

impl RunnerError {
    /// Deterministic failures finalise the record instead of retrying.
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self,
            RunnerError::NotFound(_) | RunnerError::Validation(_) | RunnerError::Safety(_)
        )
    }
}

impl From<RunnerError> for CoreError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::NotFound(msg) => CoreError::NotFound(msg),
            RunnerError::Validation(msg) => CoreError::Validation(msg),
            RunnerError::Safety(msg) => CoreError::Safety(msg),
            RunnerError::Adapter(e) => CoreError::Internal(e.to_string()),
            RunnerError::Store(e) => CoreError::from(e),
            RunnerError::Log(e) => CoreError::Internal(e.to_string()),
        }
    }
}
