//! Short-interval duplicate suppression.
//!
//! A vehicle sits in front of the camera across many consecutive sampled
//! frames, so the same plate is recognized dozens of times for one physical
//! movement. This map remembers when each plate was last logged by this
//! process and lets the pipeline skip re-deciding inside a small window.
//!
//! The map is advisory only: it lives in process memory, is lost on restart,
//! and is never consulted by the access state machine. The state machine's
//! cooldown against the persistent store is the authoritative guard.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Suppression window after a plate was last logged by this process.
pub const DEDUP_WINDOW: Duration = Duration::seconds(30);

/// Per-plate record of when this process last logged an event.
#[derive(Debug, Default)]
pub struct SeenVehicles {
    seen: HashMap<String, DateTime<Utc>>,
}

impl SeenVehicles {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the plate was logged within [`DEDUP_WINDOW`] of `now` and
    /// the caller must not produce an event for this detection.
    pub fn should_skip(&self, plate: &str, now: DateTime<Utc>) -> bool {
        let Some(last_logged) = self.seen.get(plate) else {
            return false;
        };
        let elapsed = now.signed_duration_since(*last_logged);
        if elapsed < DEDUP_WINDOW {
            log::debug!(
                "skipping {}: logged {}s ago",
                plate,
                elapsed.num_seconds()
            );
            return true;
        }
        false
    }

    /// Record that an event for `plate` was just committed.
    pub fn mark_logged(&mut self, plate: &str, now: DateTime<Utc>) {
        self.seen.insert(plate.to_string(), now);
    }
}
