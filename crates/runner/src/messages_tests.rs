// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn take_next_on_missing_dir_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert_eq!(take_next(&missing).unwrap(), None);
}

#[test]
fn messages_are_consumed_in_lexicographic_order() {
    let root = tempfile::tempdir().unwrap();
    let dir = message_dir(root.path(), "exec-1");

    drop_message(&dir, 1_000, "first").unwrap();
    drop_message(&dir, 1_000, "second").unwrap();
    drop_message(&dir, 2_000, "third").unwrap();

    assert_eq!(take_next(&dir).unwrap().as_deref(), Some("first"));
    assert_eq!(take_next(&dir).unwrap().as_deref(), Some("second"));
    assert_eq!(take_next(&dir).unwrap().as_deref(), Some("third"));
    assert_eq!(take_next(&dir).unwrap(), None);
}

#[test]
fn file_is_deleted_before_the_text_is_returned() {
    let root = tempfile::tempdir().unwrap();
    let dir = message_dir(root.path(), "exec-1");
    let path = drop_message(&dir, 1_000, "once").unwrap();

    assert_eq!(take_next(&dir).unwrap().as_deref(), Some("once"));
    assert!(!path.exists());
}

#[test]
fn non_msg_files_are_ignored() {
    let root = tempfile::tempdir().unwrap();
    let dir = message_dir(root.path(), "exec-1");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("notes.txt"), "skip me").unwrap();
    std::fs::write(dir.join(".partial.msg.tmp"), "incomplete").unwrap();

    assert_eq!(take_next(&dir).unwrap(), None);
}

#[test]
fn drop_message_names_sort_in_send_order() {
    let root = tempfile::tempdir().unwrap();
    let dir = message_dir(root.path(), "exec-1");
    let a = drop_message(&dir, 999, "a").unwrap();
    let b = drop_message(&dir, 1_000, "b").unwrap();
    assert!(a.file_name().unwrap() < b.file_name().unwrap());
}

#[test]
fn team_dir_is_namespaced() {
    let root = Path::new("/tmp/agendo-messages");
    assert_eq!(team_dir(root, "alpha"), root.join("team-alpha"));
}
