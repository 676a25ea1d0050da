// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL event write-ahead log with group commit.
//!
//! Events are applied to the in-memory state under the store lock and
//! appended here in the same critical section, so recovery is snapshot +
//! replay of the tail. Appends are buffered and flushed in ~10ms batches
//! (or when the buffer fills); `flush()` is the durability point.
//!
//! Each entry is a single line of JSON: `{"seq":N,"event":{...}}\n`

use agendo_core::Event;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Flush interval for group commit (~10ms batches)
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum entries to buffer before forcing flush
const FLUSH_THRESHOLD: usize = 100;

/// Errors that can occur in Wal operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialization helper for writing WAL entries without cloning the event.
#[derive(Serialize)]
struct WalRecordRef<'a> {
    seq: u64,
    event: &'a Event,
}

/// Deserialization helper for reading WAL entries.
#[derive(Deserialize)]
struct WalRecord {
    seq: u64,
    event: Event,
}

/// A single WAL entry with sequence number
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

/// JSONL WAL for durable event storage with group commit.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Highest sequence number written (or replayed).
    write_seq: u64,
    /// Buffered JSON lines waiting to be flushed (without trailing newline)
    write_buffer: Vec<Vec<u8>>,
    last_flush: Instant,
}

impl Wal {
    /// Open (or create) a WAL and replay entries with `seq > after_seq`.
    ///
    /// `after_seq` comes from the snapshot (0 when there is none). A corrupt
    /// tail is rotated to `.bak` with the valid prefix preserved, so a crash
    /// mid-write never blocks startup.
    pub fn open(path: &Path, after_seq: u64) -> Result<(Self, Vec<WalEntry>), WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (mut entries, corrupt) = Self::read_entries(&file)?;

        if corrupt {
            drop(file);
            let bak_path = crate::snapshot::rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = entries.len(),
                "Corrupt WAL tail detected, rotating to .bak and preserving valid entries",
            );
            std::fs::rename(path, &bak_path)?;

            // Rewrite a clean WAL holding only the valid prefix
            {
                let mut new_file = File::create(path)?;
                for entry in &entries {
                    let record = WalRecordRef {
                        seq: entry.seq,
                        event: &entry.event,
                    };
                    serde_json::to_writer(&mut new_file, &record)?;
                    new_file.write_all(b"\n")?;
                }
                new_file.sync_all()?;
            }

            file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(path)?;
        }

        let write_seq = entries.last().map(|e| e.seq).unwrap_or(after_seq);
        entries.retain(|e| e.seq > after_seq);

        Ok((
            Self {
                file,
                path: path.to_owned(),
                write_seq: write_seq.max(after_seq),
                write_buffer: Vec::new(),
                last_flush: Instant::now(),
            },
            entries,
        ))
    }

    /// Read every parseable entry; `true` in the result flags a corrupt tail.
    fn read_entries(file: &File) -> Result<(Vec<WalEntry>, bool), WalError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => return Ok((entries, true)),
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<WalRecord>(trimmed) {
                Ok(record) => entries.push(WalEntry {
                    seq: record.seq,
                    event: record.event,
                }),
                Err(_) => return Ok((entries, true)),
            }
        }

        Ok((entries, false))
    }

    /// Append an event to the write buffer.
    ///
    /// Returns the assigned sequence number. The event is NOT durable until
    /// `flush()` is called.
    pub fn append(&mut self, event: &Event) -> Result<u64, WalError> {
        self.write_seq += 1;
        let seq = self.write_seq;
        let record = WalRecordRef { seq, event };
        self.write_buffer.push(serde_json::to_vec(&record)?);
        Ok(seq)
    }

    /// Check if flush is needed (interval elapsed or buffer full).
    pub fn needs_flush(&self) -> bool {
        !self.write_buffer.is_empty()
            && (self.last_flush.elapsed() >= FLUSH_INTERVAL
                || self.write_buffer.len() >= FLUSH_THRESHOLD)
    }

    /// Flush all buffered entries to disk with a single fsync.
    pub fn flush(&mut self) -> Result<(), WalError> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }

        for mut json_bytes in self.write_buffer.drain(..) {
            json_bytes.push(b'\n');
            self.file.write_all(&json_bytes)?;
        }

        self.file.sync_all()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Highest sequence number assigned so far.
    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    /// Drop entries with `seq <= through`, called after a durable checkpoint.
    ///
    /// Rewrites the WAL via a temp file + rename so a crash mid-truncation
    /// leaves either the old or the new file, never a torn one.
    pub fn truncate_through(&mut self, through: u64) -> Result<(), WalError> {
        self.flush()?;

        let (entries, _) = Self::read_entries(&self.file)?;
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for entry in entries.iter().filter(|e| e.seq > through) {
                let record = WalRecordRef {
                    seq: entry.seq,
                    event: &entry.event,
                };
                serde_json::to_writer(&mut tmp, &record)?;
                tmp.write_all(b"\n")?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
