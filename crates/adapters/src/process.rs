// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared child-process plumbing.
//!
//! Children are spawned with a scrubbed environment and piped stdio. Reader
//! tasks split stdout/stderr into lines and push tagged chunks onto the
//! output channel; a waiter task reports the exit code. Signals go directly
//! to the pid so a handle can keep killing after the `Child` has been moved
//! into the waiter.

use std::path::Path;
use std::process::Stdio;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;

use crate::{AdapterError, OutputChunk, SpawnOpts};
use agendo_core::LogTag;

/// Signals the runner is allowed to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// Graceful termination (SIGTERM).
    Term,
    /// Forceful kill (SIGKILL) after the grace period.
    Kill,
    /// Turn interrupt (SIGINT).
    Int,
}

impl KillSignal {
    fn as_nix(self) -> Signal {
        match self {
            KillSignal::Term => Signal::SIGTERM,
            KillSignal::Kill => Signal::SIGKILL,
            KillSignal::Int => Signal::SIGINT,
        }
    }
}

/// Probe a pid for liveness (signal 0).
pub fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Signal a child's whole process group. Children are spawned as their own
/// group leaders, so the group id equals the child pid.
pub fn kill_process_group(pid: u32, signal: KillSignal) -> Result<(), AdapterError> {
    kill(Pid::from_raw(-(pid as i32)), signal.as_nix())
        .map_err(|e| AdapterError::KillFailed(format!("pgid {pid}: {e}")))
}

/// How the child's stdin is wired at spawn.
pub(crate) enum StdinMode {
    /// Keep a pipe open for protocol writes.
    Piped,
    /// Close stdin immediately (template runs).
    Closed,
}

/// A spawned child with its exit channel.
#[derive(Debug)]
pub(crate) struct ChildProcess {
    pid: u32,
    exit_rx: mpsc::Receiver<Option<i32>>,
    exited: Option<Option<i32>>,
}

impl ChildProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Deliver a signal to the child process.
    pub fn kill(&self, signal: KillSignal) -> Result<(), AdapterError> {
        kill(Pid::from_raw(self.pid as i32), signal.as_nix())
            .map_err(|e| AdapterError::KillFailed(format!("pid {}: {e}", self.pid)))
    }

    /// Await the exit code. Cancel-safe; repeated calls return the
    /// memoized result.
    pub async fn wait(&mut self) -> Option<i32> {
        if let Some(code) = self.exited {
            return code;
        }
        let code = self.exit_rx.recv().await.flatten();
        self.exited = Some(code);
        code
    }
}

/// Spawn `binary args…` with the prepared environment and start the
/// stdout/stderr reader tasks. Returns the child handle and its stdin pipe
/// (when requested).
pub(crate) fn spawn_child(
    binary: &Path,
    args: &[String],
    opts: &SpawnOpts,
    stdin_mode: StdinMode,
    output_tx: mpsc::Sender<OutputChunk>,
) -> Result<(ChildProcess, Option<ChildStdin>), AdapterError> {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .current_dir(&opts.cwd)
        .env_clear()
        .envs(opts.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(match stdin_mode {
            StdinMode::Piped => Stdio::piped(),
            StdinMode::Closed => Stdio::null(),
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| AdapterError::SpawnFailed(format!("{}: {e}", binary.display())))?;

    let pid = child
        .id()
        .ok_or_else(|| AdapterError::SpawnFailed("child exited before pid read".to_string()))?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    if let Some(stdout) = stdout {
        spawn_line_reader(stdout, LogTag::Stdout, output_tx.clone());
    }
    if let Some(stderr) = stderr {
        spawn_line_reader(stderr, LogTag::Stderr, output_tx);
    }

    let (exit_tx, exit_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(pid, error = %e, "wait on child failed");
                None
            }
        };
        let _ = exit_tx.send(code).await;
    });

    Ok((
        ChildProcess {
            pid,
            exit_rx,
            exited: None,
        },
        stdin,
    ))
}

/// Like [`spawn_child`], but hands stdout back to the caller so a protocol
/// engine can parse it. stderr is still forwarded line-by-line.
pub(crate) fn spawn_child_with_stdout(
    binary: &Path,
    args: &[String],
    opts: &SpawnOpts,
    output_tx: mpsc::Sender<OutputChunk>,
) -> Result<
    (
        ChildProcess,
        Option<ChildStdin>,
        tokio::process::ChildStdout,
    ),
    AdapterError,
> {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .current_dir(&opts.cwd)
        .env_clear()
        .envs(opts.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| AdapterError::SpawnFailed(format!("{}: {e}", binary.display())))?;

    let pid = child
        .id()
        .ok_or_else(|| AdapterError::SpawnFailed("child exited before pid read".to_string()))?;

    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AdapterError::SpawnFailed("stdout pipe missing".to_string()))?;
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, LogTag::Stderr, output_tx);
    }

    let (exit_tx, exit_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(pid, error = %e, "wait on child failed");
                None
            }
        };
        let _ = exit_tx.send(code).await;
    });

    Ok((
        ChildProcess {
            pid,
            exit_rx,
            exited: None,
        },
        stdin,
        stdout,
    ))
}

/// Forward one stdio pipe to the output channel, a line per chunk.
fn spawn_line_reader<R>(pipe: R, tag: LogTag, tx: mpsc::Sender<OutputChunk>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(OutputChunk { tag, text: line }).await.is_err() {
                break;
            }
        }
    });
}

/// Write one line (plus newline) to the child's stdin.
pub(crate) async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<(), AdapterError> {
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| AdapterError::SendFailed(e.to_string()))?;
    stdin
        .write_all(b"\n")
        .await
        .map_err(|e| AdapterError::SendFailed(e.to_string()))?;
    stdin
        .flush()
        .await
        .map_err(|e| AdapterError::SendFailed(e.to_string()))
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
