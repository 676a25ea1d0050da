// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log line tags and the log-stream event envelope.
//!
//! Log files are UTF-8 text where each physical line carries a stream tag
//! prefix (`[stdout] `, `[stderr] `, `[system] `, `[user] `). The prefix is
//! the only structure; consumers wanting richer parsing must reparse the
//! payloads themselves.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Origin tag for one log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTag {
    Stdout,
    Stderr,
    System,
    User,
}

impl LogTag {
    /// The literal prefix written before each line of this stream.
    pub fn prefix(self) -> &'static str {
        match self {
            LogTag::Stdout => "[stdout] ",
            LogTag::Stderr => "[stderr] ",
            LogTag::System => "[system] ",
            LogTag::User => "[user] ",
        }
    }

    /// Split a physical line into its tag and payload.
    ///
    /// Untagged lines default to stdout with the full line as payload.
    pub fn parse_line(line: &str) -> (LogTag, &str) {
        for tag in [LogTag::Stdout, LogTag::Stderr, LogTag::System, LogTag::User] {
            if let Some(rest) = line.strip_prefix(tag.prefix()) {
                return (tag, rest);
            }
        }
        (LogTag::Stdout, line)
    }
}

impl fmt::Display for LogTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogTag::Stdout => write!(f, "stdout"),
            LogTag::Stderr => write!(f, "stderr"),
            LogTag::System => write!(f, "system"),
            LogTag::User => write!(f, "user"),
        }
    }
}

/// One event on a log-stream connection.
///
/// A stream is: `status`, optional `catchup`, any number of `log` and
/// `status` events, then exactly one `done` (or `error` at any point,
/// which also closes the stream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Status {
        status: String,
    },
    Catchup {
        content: String,
    },
    Log {
        content: String,
        stream: LogTag,
    },
    Done {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
