//! Access log queue with acknowledge-after-delivery semantics.
//!
//! Entries are only removed once the controller acknowledges receipt, so a
//! failed POST costs nothing but time. The queue is bounded; overflow drops
//! the oldest entry. RAM only - a reboot loses whatever was pending.

use alloc::collections::VecDeque;
use alloc::string::String;

pub const LOG_QUEUE_MAX: usize = 500;

/// Credential category recorded with each decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Card,
    Pin,
    TempCode,
    Manual,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Card => "card",
            CredentialKind::Pin => "pin",
            CredentialKind::TempCode => "temp_code",
            CredentialKind::Manual => "manual",
        }
    }
}

/// One access decision, as reported to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: String,
    pub door: u8,
    pub principal: String,
    pub credential: String,
    pub credential_type: CredentialKind,
    pub granted: bool,
    pub reason: String,
}

/// Bounded FIFO of pending log entries.
///
/// Delivery peeks the head, posts it, and acknowledges by sequence number.
/// If overflow evicted the peeked entry in the meantime the acknowledge is
/// a no-op, which keeps at-least-once delivery without double-sending.
pub struct LogQueue {
    entries: VecDeque<(u64, LogEntry)>,
    next_seq: u64,
}

impl LogQueue {
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, evicting the oldest when full.
    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= LOG_QUEUE_MAX {
            log::warn!("events: log queue full, dropping oldest entry");
            self.entries.pop_front();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back((seq, entry));
    }

    /// Oldest undelivered entry with its acknowledge token.
    pub fn peek(&self) -> Option<(u64, &LogEntry)> {
        self.entries.front().map(|(seq, e)| (*seq, e))
    }

    /// Remove the head if it is still the entry delivered under `seq`.
    pub fn acknowledge(&mut self, seq: u64) {
        if self.entries.front().map(|(s, _)| *s) == Some(seq) {
            self.entries.pop_front();
        }
    }
}

impl Default for LogQueue {
    fn default() -> Self {
        Self::new()
    }
}
