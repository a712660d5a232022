//! A bounded rolling log of server-side failures.
//!
//! Every connection of a server appends to the same [`DiagnosticsLog`], shared through an
//! `Arc`. The log keeps the most recent entries only: once full, each append evicts the
//! oldest entry. It complements `tracing` output with something an operator can fetch
//! from the running process, e.g. through a diagnostics endpoint.

use std::collections::VecDeque;
use std::fmt::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of entries kept
pub const DEFAULT_CAPACITY: usize = 1000;

/// One log line: an HTTP date timestamp and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug)]
pub struct DiagnosticsLog {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl DiagnosticsLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log keeping at most `capacity` entries. A capacity of 0 keeps nothing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append<S: Into<String>>(&self, message: S) {
        if self.capacity == 0 {
            return;
        }

        let entry = LogEntry { timestamp: http_date(), message: message.into() };
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Returns a snapshot of the entries, most recent first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().iter().rev().cloned().collect()
    }

    /// Renders the entries most recent first, one `<http-date> <message>` line each.
    pub fn dump(&self) -> String {
        let entries = self.lock();
        let mut out = String::with_capacity(entries.len() * 64);
        for entry in entries.iter().rev() {
            // writing to a String cannot fail
            let _ = writeln!(out, "{} {}", entry.timestamp, entry.message);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    // A panic while holding the lock cannot leave the deque inconsistent.
    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn http_date() -> String {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    String::from_utf8_lossy(&buf[..]).into_owned()
}
