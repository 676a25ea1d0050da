// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use agendo_core::test_support::TaskBuilder;
use std::fs;

fn state_with_task() -> MaterializedState {
    let mut state = MaterializedState::default();
    let task = TaskBuilder::default().id("task-9").build();
    state.tasks.insert("task-9".to_string(), task);
    state
}

#[test]
fn save_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.bin");

    Snapshot::new(7, state_with_task()).save(&path).unwrap();

    let loaded = Snapshot::load(&path).unwrap().unwrap();
    assert_eq!(loaded.seq, 7);
    assert!(loaded.state.tasks.contains_key("task-9"));
}

#[test]
fn saved_snapshots_are_zstd_compressed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.bin");

    Snapshot::new(1, state_with_task()).save(&path).unwrap();

    let raw = fs::read(&path).unwrap();
    assert_eq!(&raw[..4], &[0x28, 0xb5, 0x2f, 0xfd], "should be zstd format");
}

#[test]
fn plain_json_snapshots_still_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.bin");

    let snapshot = Snapshot::new(3, state_with_task());
    fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

    let loaded = Snapshot::load(&path).unwrap().unwrap();
    assert_eq!(loaded.seq, 3);
}

#[test]
fn missing_snapshot_is_none() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Snapshot::load(&dir.path().join("absent")).unwrap().is_none());
}

#[test]
fn corrupt_snapshot_rotates_to_bak() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.bin");
    fs::write(&path, b"definitely not a snapshot").unwrap();

    assert!(Snapshot::load(&path).unwrap().is_none());
    assert!(!path.exists());
    assert!(path.with_extension("bak").exists());
}

#[test]
fn bak_rotation_keeps_bounded_history() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.bin");

    for _ in 0..5 {
        fs::write(&path, b"garbage").unwrap();
        assert!(Snapshot::load(&path).unwrap().is_none());
    }

    let baks: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("bak"))
        .collect();
    assert_eq!(baks.len(), 3);
}
