// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message-drop directories.
//!
//! Inbound user messages are one UTF-8 `.msg` file each under
//! `{root}/{execution_id}/`. Writers write-then-rename atomically with
//! names that sort lexicographically in send order; the runner consumes
//! the smallest name and deletes the file *before* forwarding, so a crash
//! mid-send loses at most one message instead of delivering it twice.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-process counter breaking ties within one millisecond.
static DROP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Directory for one run's inbound messages.
pub fn message_dir(root: &Path, id: &str) -> PathBuf {
    root.join(id)
}

/// Team inbox shared by peer sessions.
pub fn team_dir(root: &Path, team: &str) -> PathBuf {
    root.join(format!("team-{team}"))
}

/// Atomically drop one message: write to a dot-temp name, then rename to
/// a `.msg` name that sorts in send order.
pub fn drop_message(dir: &Path, epoch_ms: u64, text: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let seq = DROP_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = format!("{epoch_ms:013}-{seq:06}.msg");
    let tmp = dir.join(format!(".{name}.tmp"));
    let target = dir.join(name);
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, &target)?;
    Ok(target)
}

/// Take the lexicographically smallest `.msg` file, deleting it before
/// returning its contents. Returns `None` when the directory is empty or
/// missing.
pub fn take_next(dir: &Path) -> std::io::Result<Option<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut names: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|ext| ext == "msg").unwrap_or(false))
        .collect();
    names.sort();

    let Some(path) = names.into_iter().next() else {
        return Ok(None);
    };

    let text = std::fs::read_to_string(&path)?;
    // Delete before forwarding: double-delivery is worse than a lost
    // message here
    std::fs::remove_file(&path)?;
    Ok(Some(text))
}

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
