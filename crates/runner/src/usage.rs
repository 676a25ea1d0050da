// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Post-mortem usage scan.
//!
//! After a run ends, the log is read once more looking for a Claude-style
//! `result` NDJSON record; `total_cost_usd`, `num_turns`, and `duration_ms`
//! are pulled onto the execution record when present. The last result
//! record wins.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use agendo_core::{ExecutionUsage, LogTag};

/// Scan a closed log file for usage accounting.
pub fn scan_log(path: &Path) -> ExecutionUsage {
    let Ok(file) = File::open(path) else {
        return ExecutionUsage::default();
    };

    let mut usage = ExecutionUsage::default();
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        let (tag, payload) = LogTag::parse_line(&line);
        if tag != LogTag::Stdout {
            continue;
        }
        if let Some(found) = usage_from_line(payload) {
            usage = found;
        }
    }
    usage
}

fn usage_from_line(payload: &str) -> Option<ExecutionUsage> {
    let value: serde_json::Value = serde_json::from_str(payload.trim()).ok()?;
    if value.get("type")?.as_str()? != "result" {
        return None;
    }
    Some(ExecutionUsage {
        cost_usd: value.get("total_cost_usd").and_then(|v| v.as_f64()),
        num_turns: value.get("num_turns").and_then(|v| v.as_u64()),
        duration_ms: value.get("duration_ms").and_then(|v| v.as_u64()),
    })
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod tests;
