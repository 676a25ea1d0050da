// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    not_found = { CoreError::NotFound("x".into()), "not_found" },
    validation = { CoreError::Validation("x".into()), "validation" },
    conflict = { CoreError::Conflict("x".into()), "conflict" },
    safety = { CoreError::Safety("x".into()), "safety" },
    timeout = { CoreError::Timeout("x".into()), "timeout" },
    internal = { CoreError::Internal("x".into()), "internal" },
)]
fn codes_are_stable(err: CoreError, code: &str) {
    assert_eq!(err.code(), code);
}

#[test]
fn messages_include_context() {
    let err = CoreError::Safety("working directory outside allow-list".into());
    assert_eq!(
        err.to_string(),
        "safety violation: working directory outside allow-list"
    );
}
