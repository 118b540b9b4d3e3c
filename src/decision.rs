//! The access state machine.
//!
//! Given a plate's latest persisted event and its current authorization, this
//! module decides the next status: entry, exit, blocked, or nothing at all.
//! It reads only the persistent history, never the process-local dedup map,
//! so decisions are consistent across restarts and across concurrent workers
//! sharing one store. Two workers racing inside the cooldown can still
//! double-log; that overlap is accepted rather than serialized.
//!
//! Transitions, per plate:
//!
//! - no history: entry when access is granted, blocked otherwise
//! - any history younger than the cooldown: suppressed
//! - after entry: exit, regardless of current authorization
//! - after exit: entry when granted, blocked otherwise
//! - after blocked: entry when granted, blocked again otherwise
//! - after a sighting with unknown status: as if no history, once the
//!   cooldown has passed

use chrono::{DateTime, Duration, Utc};

use crate::{AccessStatus, AuthStatus, LastEvent};

/// Minimum age of a plate's latest event before a new transition is allowed.
pub const REARM_COOLDOWN: Duration = Duration::minutes(2);

/// Why a status was chosen. One reason per transition arm; recorded in logs
/// so an operator can reconstruct the machine's path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReasonCode {
    NewVehicleEntry,
    NewVehicleBlocked,
    ExitAfterEntry,
    ReentryAfterExit,
    BlockedAfterExit,
    EntryAfterClearance,
    StillBlocked,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::NewVehicleEntry => "new_vehicle_entry",
            ReasonCode::NewVehicleBlocked => "new_vehicle_blocked",
            ReasonCode::ExitAfterEntry => "exit_after_entry",
            ReasonCode::ReentryAfterExit => "reentry_after_exit",
            ReasonCode::BlockedAfterExit => "blocked_after_exit",
            ReasonCode::EntryAfterClearance => "entry_after_clearance",
            ReasonCode::StillBlocked => "still_blocked",
        }
    }
}

/// Outcome of one non-deduplicated detection: exactly one of a recordable
/// status or a suppression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Record(AccessStatus, ReasonCode),
    /// The plate's latest event is younger than [`REARM_COOLDOWN`].
    Suppressed,
}

/// Decide the next status for a plate.
///
/// `last` is the History Lookup result: the plate's latest persisted
/// sighting, or none. The sighting's timestamp always counts toward the
/// cooldown; its status is unknown when the stored status text was not
/// recognized, and past the cooldown such a plate decides like a first
/// sighting. A latest event with a future timestamp yields a negative
/// elapsed time, which is inside the cooldown, so it suppresses.
pub fn decide(last: Option<LastEvent>, now: DateTime<Utc>, auth: AuthStatus) -> Verdict {
    let Some(last) = last else {
        return first_sighting(auth);
    };

    let elapsed = now.signed_duration_since(last.timestamp);
    if elapsed < REARM_COOLDOWN {
        return Verdict::Suppressed;
    }

    match last.status {
        None => first_sighting(auth),
        // Exit does not consult authorization: a vehicle that is inside must
        // be able to leave even if its permission lapsed meanwhile.
        Some(AccessStatus::Entry) => {
            Verdict::Record(AccessStatus::Exit, ReasonCode::ExitAfterEntry)
        }
        Some(AccessStatus::Exit) => {
            if auth.grants_access() {
                Verdict::Record(AccessStatus::Entry, ReasonCode::ReentryAfterExit)
            } else {
                Verdict::Record(AccessStatus::Blocked, ReasonCode::BlockedAfterExit)
            }
        }
        Some(AccessStatus::Blocked) => {
            if auth.grants_access() {
                Verdict::Record(AccessStatus::Entry, ReasonCode::EntryAfterClearance)
            } else {
                Verdict::Record(AccessStatus::Blocked, ReasonCode::StillBlocked)
            }
        }
    }
}

fn first_sighting(auth: AuthStatus) -> Verdict {
    if auth.grants_access() {
        Verdict::Record(AccessStatus::Entry, ReasonCode::NewVehicleEntry)
    } else {
        Verdict::Record(AccessStatus::Blocked, ReasonCode::NewVehicleBlocked)
    }
}
