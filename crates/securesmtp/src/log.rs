//! Communication log: an append-only transcript of the SMTP dialogue.
//!
//! The client never reads entries back. [`TracingLog`] forwards them to
//! `tracing`; [`MemoryLog`] keeps them for inspection.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Sent or decided by the client.
    Client,
    /// Received from the server.
    Server,
    /// A joint step such as the TLS handshake.
    Both,
}

impl Side {
    /// Returns the short transcript marker.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "c",
            Self::Server => "s",
            Self::Both => "c & s",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Origin of the line.
    pub side: Side,
    /// Line text.
    pub text: String,
}

/// Write-only sink for transcript lines.
pub trait CommunicationLog: fmt::Debug + Send + Sync {
    /// Appends a line.
    fn add_item(&self, side: Side, text: &str);
}

/// Forwards transcript lines to `tracing` under the `securesmtp::comm` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl CommunicationLog for TracingLog {
    fn add_item(&self, side: Side, text: &str) {
        tracing::info!(target: "securesmtp::comm", side = side.as_str(), "{}", text.trim_end());
    }
}

/// Keeps transcript lines in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemoryLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all entries.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true if any entry contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|entry| entry.text.contains(needle))
    }
}

impl CommunicationLog for MemoryLog {
    fn add_item(&self, side: Side, text: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogEntry {
                side,
                text: text.trim_end().to_string(),
            });
    }
}
