// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for crash recovery.
//!
//! Snapshots store the complete materialized state at a point in time,
//! identified by the WAL sequence number. Recovery loads the snapshot and
//! replays WAL entries after that sequence. Snapshots are zstd-compressed
//! JSON; plain JSON is still accepted on load for older files.

use crate::MaterializedState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// zstd level 3 is a good balance of speed and compression
const COMPRESSION_LEVEL: i32 = 3;

/// First bytes of a zstd frame, used to distinguish formats on load.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Errors that can occur in snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A snapshot of the materialized state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// WAL sequence number at the time of snapshot
    pub seq: u64,
    /// The complete materialized state
    pub state: MaterializedState,
    /// When this snapshot was created
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a new snapshot.
    pub fn new(seq: u64, state: MaterializedState) -> Self {
        Self {
            seq,
            state,
            created_at: Utc::now(),
        }
    }

    /// Save the snapshot durably: compress to `.tmp`, fsync, rename, fsync
    /// the parent directory. A crash at any point leaves either the old or
    /// the new snapshot, never a torn one.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json_bytes = serde_json::to_vec(self)?;
        let compressed = zstd::encode_all(json_bytes.as_slice(), COMPRESSION_LEVEL)?;

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&compressed)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        // Directory fsync makes the rename itself durable
        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }

    /// Load the snapshot if it exists.
    ///
    /// Returns `Ok(None)` if the file doesn't exist or is corrupt. Corrupt
    /// snapshots are moved to a `.bak` file so startup can recover via WAL
    /// replay.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        if !path.exists() {
            return Ok(None);
        }

        let mut raw = Vec::new();
        File::open(path)?.read_to_end(&mut raw)?;

        let json_bytes = if raw.starts_with(&ZSTD_MAGIC) {
            match zstd::decode_all(raw.as_slice()) {
                Ok(bytes) => bytes,
                Err(e) => return Self::rotate_corrupt(path, &e.to_string()),
            }
        } else {
            raw
        };

        match serde_json::from_slice(&json_bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => Self::rotate_corrupt(path, &e.to_string()),
        }
    }

    fn rotate_corrupt(path: &Path, error: &str) -> Result<Option<Self>, SnapshotError> {
        let bak_path = rotate_bak_path(path);
        warn!(
            error,
            path = %path.display(),
            bak = %bak_path.display(),
            "Corrupt snapshot, moving to .bak and starting fresh",
        );
        fs::rename(path, &bak_path)?;
        Ok(None)
    }
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
pub(crate) fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| -> PathBuf {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    for n in 1..=MAX_BAK_FILES {
        if !bak(n).exists() {
            return bak(n);
        }
    }

    // All slots taken: shift everything down and reuse the last slot
    let _ = fs::remove_file(bak(1));
    for n in 2..=MAX_BAK_FILES {
        let _ = fs::rename(bak(n), bak(n - 1));
    }
    bak(MAX_BAK_FILES)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
