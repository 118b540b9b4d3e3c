//! Event feed for live subscribers.
//!
//! Committed events are appended to a shared in-process journal. Subscribers
//! hold a cursor (an offset into the journal) and poll for entries past it;
//! a subscriber that connects late still receives everything committed since
//! its cursor was taken, and slow subscribers never block the pipeline.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::LogEntry;

/// How often a polling subscriber re-checks the journal.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Cloneable handle to the shared event journal. Clones publish into and
/// read from the same journal.
#[derive(Clone, Debug, Default)]
pub struct EventFeed {
    journal: Arc<Mutex<Vec<LogEntry>>>,
}

impl EventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, entry: &LogEntry) {
        self.journal
            .lock()
            .expect("event journal lock")
            .push(entry.clone());
    }

    pub fn len(&self) -> usize {
        self.journal.lock().expect("event journal lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries committed at or after `offset`, oldest first.
    pub fn since(&self, offset: usize) -> Vec<LogEntry> {
        let journal = self.journal.lock().expect("event journal lock");
        journal.get(offset..).map(<[_]>::to_vec).unwrap_or_default()
    }

    /// A cursor positioned at the current journal tail. The subscriber sees
    /// only events committed after this call.
    pub fn subscribe(&self) -> EventCursor {
        EventCursor {
            feed: self.clone(),
            offset: self.len(),
        }
    }

    /// A cursor positioned at an explicit offset, for subscribers resuming
    /// after a disconnect.
    pub fn subscribe_at(&self, offset: usize) -> EventCursor {
        EventCursor {
            feed: self.clone(),
            offset,
        }
    }
}

/// One subscriber's position in the journal.
#[derive(Clone, Debug)]
pub struct EventCursor {
    feed: EventFeed,
    offset: usize,
}

impl EventCursor {
    /// Drain everything committed since the last poll. Empty when nothing
    /// new arrived; each entry is delivered exactly once per cursor.
    pub fn poll(&mut self) -> Vec<LogEntry> {
        let fresh = self.feed.since(self.offset);
        self.offset += fresh.len();
        fresh
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}
