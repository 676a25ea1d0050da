// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log streaming: fan-out tailing of per-run log files.
//!
//! Each stream gets a status preamble, a catch-up dump of the file so far,
//! then one `log` event per line as the file grows, and a terminal `done`.
//! File growth is observed two ways at once: a notify watcher (best-effort)
//! and a 500 ms polling timer (the reliable floor); both trigger the same
//! cursor-advancing read. Row status is re-polled every second.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use agendo_core::{LogTag, SessionStatus, StreamEvent};
use agendo_storage::Store;
use notify::{RecursiveMode, Watcher};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::protocol::{write_stream_event, ProtocolError};

/// Polling fallback cadence for file reads.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Row status re-poll cadence.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which table the stream follows. The machinery is identical; only the
/// row lookup and the terminal statuses differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTarget {
    Execution,
    Session,
}

#[derive(Debug, Clone, PartialEq)]
struct RowSnapshot {
    status: String,
    terminal: bool,
    exit_code: Option<i32>,
    log_path: Option<PathBuf>,
}

fn snapshot(store: &Store, target: StreamTarget, id: &str) -> Option<RowSnapshot> {
    store.read(|state| match target {
        StreamTarget::Execution => state.get_execution(id).map(|e| RowSnapshot {
            status: e.status.to_string(),
            terminal: e.status.is_terminal(),
            exit_code: e.exit_code,
            log_path: e.log_path.clone(),
        }),
        StreamTarget::Session => state.get_session(id).map(|s| RowSnapshot {
            status: s.status.to_string(),
            terminal: s.status == SessionStatus::Ended,
            exit_code: None,
            log_path: s.log_path.clone(),
        }),
    })
}

/// Serve one log stream until the row reaches a terminal status or the
/// client goes away.
pub async fn stream_logs<W: AsyncWriteExt + Unpin>(
    store: &Store,
    target: StreamTarget,
    id: &str,
    writer: &mut W,
) -> Result<(), ProtocolError> {
    let Some(mut row) = snapshot(store, target, id) else {
        write_stream_event(
            writer,
            &StreamEvent::Error {
                message: format!("not found: {id}"),
            },
        )
        .await?;
        return Ok(());
    };

    write_stream_event(
        writer,
        &StreamEvent::Status {
            status: row.status.clone(),
        },
    )
    .await?;

    // Catch-up: dump everything written so far and park the cursor at the
    // end of it
    let mut cursor = 0u64;
    if let Some(path) = &row.log_path {
        if let Ok(content) = std::fs::read_to_string(path) {
            cursor = content.len() as u64;
            write_stream_event(writer, &StreamEvent::Catchup { content }).await?;
        }
    }

    if row.terminal {
        write_stream_event(
            writer,
            &StreamEvent::Done {
                status: row.status.clone(),
                exit_code: row.exit_code,
            },
        )
        .await?;
        return Ok(());
    }

    // Best-effort notify watcher; the polling timer below is the floor
    let (watch_tx, mut watch_rx) = mpsc::channel::<()>(8);
    let _watcher_guard = row.log_path.as_deref().and_then(|p| watch_file(p, watch_tx));

    let mut read_tick = tokio::time::interval(READ_POLL_INTERVAL);
    read_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut status_tick = tokio::time::interval(STATUS_POLL_INTERVAL);
    status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = read_tick.tick() => {
                emit_new_lines(&row.log_path, &mut cursor, writer).await?;
            }

            Some(()) = watch_rx.recv() => {
                emit_new_lines(&row.log_path, &mut cursor, writer).await?;
            }

            _ = status_tick.tick() => {
                let Some(current) = snapshot(store, target, id) else {
                    write_stream_event(
                        writer,
                        &StreamEvent::Error { message: format!("not found: {id}") },
                    )
                    .await?;
                    return Ok(());
                };

                if current.log_path != row.log_path {
                    row.log_path = current.log_path.clone();
                }
                if current.status != row.status {
                    write_stream_event(
                        writer,
                        &StreamEvent::Status { status: current.status.clone() },
                    )
                    .await?;
                }
                if current.terminal {
                    // Final read so nothing written during finalisation is
                    // dropped
                    emit_new_lines(&row.log_path, &mut cursor, writer).await?;
                    write_stream_event(
                        writer,
                        &StreamEvent::Done {
                            status: current.status,
                            exit_code: current.exit_code,
                        },
                    )
                    .await?;
                    return Ok(());
                }
                row = current;
            }
        }
    }
}

/// Read from the cursor to the current end, emit one `log` event per
/// complete line, and advance the cursor past what was emitted. A partial
/// trailing line stays unread until the writer finishes it.
async fn emit_new_lines<W: AsyncWriteExt + Unpin>(
    log_path: &Option<PathBuf>,
    cursor: &mut u64,
    writer: &mut W,
) -> Result<(), ProtocolError> {
    let Some(path) = log_path else {
        return Ok(());
    };
    let Ok(mut file) = std::fs::File::open(path) else {
        return Ok(());
    };
    if file.seek(SeekFrom::Start(*cursor)).is_err() {
        return Ok(());
    }

    let mut fresh = String::new();
    if file.read_to_string(&mut fresh).is_err() || fresh.is_empty() {
        return Ok(());
    }

    let complete = match fresh.rfind('\n') {
        Some(last_newline) => &fresh[..=last_newline],
        None => return Ok(()),
    };

    for line in complete.lines() {
        let (stream, content) = LogTag::parse_line(line);
        write_stream_event(
            writer,
            &StreamEvent::Log {
                content: content.to_string(),
                stream,
            },
        )
        .await?;
    }
    *cursor += complete.len() as u64;
    Ok(())
}

/// Install a notify watcher that nudges the read loop on any file event.
fn watch_file(path: &Path, tx: mpsc::Sender<()>) -> Option<notify::RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            let _ = tx.blocking_send(());
        }
    })
    .ok()?;
    match watcher.watch(path, RecursiveMode::NonRecursive) {
        Ok(()) => Some(watcher),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "file watch unavailable, polling only");
            None
        }
    }
}

#[cfg(test)]
#[path = "logstream_tests.rs"]
mod tests;
