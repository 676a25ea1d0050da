// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only per-run log files.
//!
//! One file per run at `{log_dir}/{YYYY}/{MM}/{id}.log`, every physical
//! line prefixed with its stream tag. Byte and line counts are kept in
//! memory so the output limit can be enforced without re-reading the file;
//! they are flushed to the record every five seconds when dirty and once
//! at close.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use agendo_core::LogTag;
use chrono::{TimeZone, Utc};

/// Stats flush cadence.
const STATS_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Compute the log path for a run id at a point in time.
pub fn log_path(log_dir: &Path, epoch_ms: u64, id: &str) -> PathBuf {
    let when = Utc
        .timestamp_millis_opt(epoch_ms as i64)
        .single()
        .unwrap_or_else(Utc::now);
    log_dir
        .join(when.format("%Y").to_string())
        .join(when.format("%m").to_string())
        .join(format!("{id}.log"))
}

/// Append-only writer with prefix tags and in-memory accounting.
pub struct ExecutionLogWriter {
    file: File,
    path: PathBuf,
    byte_size: u64,
    line_count: u64,
    dirty: bool,
    last_stats_flush: Instant,
}

impl ExecutionLogWriter {
    /// Open (creating directories) in append mode.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let byte_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            file,
            path: path.to_owned(),
            byte_size,
            line_count: 0,
            dirty: false,
            last_stats_flush: Instant::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one line under a stream tag. Multi-line payloads get the
    /// prefix on every physical line.
    pub fn write(&mut self, tag: LogTag, text: &str) -> std::io::Result<()> {
        for line in text.split('\n') {
            let physical = format!("{}{}\n", tag.prefix(), line);
            self.file.write_all(physical.as_bytes())?;
            self.byte_size += physical.len() as u64;
            self.line_count += 1;
        }
        self.dirty = true;
        Ok(())
    }

    /// Current file size in bytes, queryable synchronously for the output
    /// limit check.
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn line_count(&self) -> u64 {
        self.line_count
    }

    /// Return the counts when the flush window elapsed and writes happened
    /// since the last flush; the caller persists them to the record.
    pub fn stats_if_due(&mut self) -> Option<(u64, u64)> {
        if self.dirty && self.last_stats_flush.elapsed() >= STATS_FLUSH_INTERVAL {
            self.dirty = false;
            self.last_stats_flush = Instant::now();
            Some((self.byte_size, self.line_count))
        } else {
            None
        }
    }

    /// Final flush: sync the file and return the closing counts.
    pub fn close(mut self) -> std::io::Result<(u64, u64)> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok((self.byte_size, self.line_count))
    }
}

#[cfg(test)]
#[path = "logwriter_tests.rs"]
mod tests;
