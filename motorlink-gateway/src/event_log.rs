//! Bounded log of decoded device events.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::status::StatusCode;

/// Default number of events retained.
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// A status byte received from a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    /// Channel the byte was read from (e.g. "m1").
    pub channel: String,
    /// Decoded status.
    pub status: StatusCode,
}

impl LogEvent {
    pub fn new(channel: impl Into<String>, status: StatusCode) -> Self {
        Self {
            channel: channel.into(),
            status,
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.channel, self.status)
    }
}

/// Fixed-capacity, insertion-ordered event log.
///
/// Appends take the write lock for the duration of a single push/evict, and
/// snapshots take the read lock for a single clone, so readers never see a
/// partially applied append and never block each other.
#[derive(Debug)]
pub struct EventLog {
    events: RwLock<VecDeque<LogEvent>>,
    capacity: usize,
}

/// Thread-safe reference to an event log.
pub type SharedEventLog = Arc<EventLog>;

impl EventLog {
    /// Create a log holding at most `capacity` events (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an event, evicting the oldest ones beyond capacity.
    pub fn append(&self, event: LogEvent) {
        let mut events = self.events.write();
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }

    /// Point-in-time copy of the log, oldest first.
    pub fn snapshot(&self) -> Vec<LogEvent> {
        self.events.read().iter().cloned().collect()
    }

    /// Snapshot rendered as `"<channel>: <status>"` lines.
    pub fn lines(&self) -> Vec<String> {
        self.events.read().iter().map(ToString::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
