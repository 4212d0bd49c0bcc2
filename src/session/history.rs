//! Error history
//!
//! Bounded, most-recent-first record of command failures seen by a session.

use std::collections::VecDeque;

use crate::error::CommandFailure;

/// Outcome of `Session::last_error`
#[derive(Debug, Clone, PartialEq)]
pub enum LastError {
    /// No failure recorded
    Ok { n: i64 },

    /// The most recent failure
    Failed(CommandFailure),
}

impl LastError {
    pub fn is_ok(&self) -> bool {
        matches!(self, LastError::Ok { .. })
    }
}

/// Outcome of the most recent write command on a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastStatus {
    /// Documents affected
    pub n: i64,

    /// Whether an update changed an existing document
    pub updated_existing: bool,

    /// First write error, if the write failed
    pub error: Option<CommandFailure>,
}

/// Rolling failure log
#[derive(Debug, Clone)]
pub struct ErrorHistory {
    entries: VecDeque<CommandFailure>,
    capacity: usize,
}

impl ErrorHistory {
    /// History holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a failure as the newest entry, dropping the oldest past capacity
    pub fn record(&mut self, failure: CommandFailure) {
        self.entries.push_front(failure);
        self.entries.truncate(self.capacity);
    }

    /// Newest entry
    pub fn latest(&self) -> Option<&CommandFailure> {
        self.entries.front()
    }

    /// Every entry, newest first
    pub fn to_vec(&self) -> Vec<CommandFailure> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
