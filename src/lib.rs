//! Gatewatch license-plate access kernel.
//!
//! This crate implements the decision core for vehicle access control:
//! it turns a stream of noisy, repeated plate recognitions into exactly one
//! authoritative access event per vehicle movement.
//!
//! # Architecture
//!
//! Per sampled frame the pipeline runs:
//!
//! 1. Detect plate boxes, crop, recognize text (`detect`)
//! 2. Normalize the raw text into a canonical plate id (`normalize`)
//! 3. Gate out frame-rate duplicates (`dedup`)
//! 4. Load the plate's latest persisted event (`store`)
//! 5. Resolve current authorization against the visitor directory (`authorize`)
//! 6. Run the access state machine (`decision`)
//! 7. Record: snapshot, commit, mark seen, publish (`pipeline`)
//!
//! The persistent access log is the single source of truth for per-plate
//! state; the dedup map is advisory and process-local. Missing or malformed
//! authorization data always resolves to a denial, never to a grant.

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};

pub mod api;
pub mod authorize;
pub mod config;
pub mod decision;
pub mod dedup;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod normalize;
pub mod pipeline;
pub mod publish;
pub mod snapshot;
pub mod store;

pub use authorize::{
    resolve_authorization, AuthWindow, InMemoryVisitorDirectory, SqliteVisitorDirectory,
    TimestampValue, VisitorDirectory, VisitorRecord,
};
pub use decision::{decide, ReasonCode, Verdict, REARM_COOLDOWN};
pub use dedup::{SeenVehicles, DEDUP_WINDOW};
pub use detect::{PlateBox, PlateDetector, PlateReading, PlateRecognizer, StubDetector};
pub use frame::RawFrame;
pub use ingest::{file::FileConfig, FileSource, FrameSource, UrlSource};
pub use normalize::{confidence_percent, normalize_plate};
pub use pipeline::{Pipeline, FRAME_STRIDE};
pub use publish::{EventCursor, EventFeed};
pub use snapshot::{
    sanitize_snapshot_name, DirSnapshotSink, SnapshotSink, StubSnapshotSink,
    SNAPSHOT_UPLOAD_FAILED,
};
pub use store::{AccessLogStore, InMemoryAccessLogStore, SqliteAccessLogStore};

/// Authorization class for a plate at a given instant.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Authorized,
    Visitor,
    Unauthorized,
}

impl AuthStatus {
    pub fn grants_access(self) -> bool {
        !matches!(self, AuthStatus::Unauthorized)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthStatus::Authorized => "authorized",
            AuthStatus::Visitor => "visitor",
            AuthStatus::Unauthorized => "unauthorized",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "authorized" => Some(AuthStatus::Authorized),
            "visitor" => Some(AuthStatus::Visitor),
            "unauthorized" => Some(AuthStatus::Unauthorized),
            _ => None,
        }
    }
}

/// Logged access status for a vehicle movement.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AccessStatus {
    Entry,
    Exit,
    Blocked,
}

impl AccessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessStatus::Entry => "entry",
            AccessStatus::Exit => "exit",
            AccessStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entry" => Some(AccessStatus::Entry),
            "exit" => Some(AccessStatus::Exit),
            "blocked" => Some(AccessStatus::Blocked),
            _ => None,
        }
    }
}

/// One committed access event. Immutable once written; the latest entry per
/// plate is the authoritative current state of that vehicle.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub plate: String,
    pub status: AccessStatus,
    /// Authorization class at decision time.
    pub visitor_status: AuthStatus,
    pub timestamp: DateTime<Utc>,
    /// Public snapshot URL, or [`SNAPSHOT_UPLOAD_FAILED`].
    pub snapshot_url: String,
}

impl LogEntry {
    /// Timestamp in the canonical stored text form (RFC 3339, UTC, `Z`).
    pub fn timestamp_text(&self) -> String {
        format_utc_timestamp(self.timestamp)
    }

    pub fn last_event(&self) -> LastEvent {
        LastEvent {
            status: Some(self.status),
            timestamp: self.timestamp,
        }
    }
}

/// History Lookup result for a plate: when it was last seen and, when the
/// stored status text is recognized, what happened then.
///
/// `status` is `None` for a row whose status text the current software does
/// not recognize. Such a row still arms the rearm cooldown through its
/// timestamp; past the cooldown the plate decides like a first sighting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LastEvent {
    pub status: Option<AccessStatus>,
    pub timestamp: DateTime<Utc>,
}

/// Canonical stored timestamp form: RFC 3339 with a `Z` suffix.
pub fn format_utc_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored or directory-supplied timestamp into a UTC instant.
///
/// Accepts RFC 3339 with offset or `Z` suffix, and bare `YYYY-MM-DDTHH:MM:SS`
/// (with optional fraction) which is taken as already-UTC. Returns `None`
/// rather than an error; callers treat unparsable input as missing data.
pub fn parse_utc_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Short random hex suffix for snapshot names.
pub(crate) fn random_suffix() -> String {
    let mut bytes = [0u8; 3];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// URI for a shared in-memory SQLite database, so several connections in one
/// process (pipeline, API thread, tests) see the same data.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:gatewatch_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_round_trips_through_text() {
        let instant = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        let text = format_utc_timestamp(instant);
        assert_eq!(parse_utc_timestamp(&text), Some(instant));
    }

    #[test]
    fn timestamp_accepts_offset_and_naive_forms() {
        let with_offset = parse_utc_timestamp("2025-03-14T10:26:53+01:00").unwrap();
        let zulu = parse_utc_timestamp("2025-03-14T09:26:53Z").unwrap();
        let naive = parse_utc_timestamp("2025-03-14T09:26:53").unwrap();
        assert_eq!(with_offset, zulu);
        assert_eq!(naive, zulu);
    }

    #[test]
    fn timestamp_rejects_garbage() {
        assert_eq!(parse_utc_timestamp("not-a-timestamp"), None);
        assert_eq!(parse_utc_timestamp(""), None);
    }

    #[test]
    fn status_string_forms_round_trip() {
        for status in [AccessStatus::Entry, AccessStatus::Exit, AccessStatus::Blocked] {
            assert_eq!(AccessStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AccessStatus::parse("parked"), None);
        for auth in [
            AuthStatus::Authorized,
            AuthStatus::Visitor,
            AuthStatus::Unauthorized,
        ] {
            assert_eq!(AuthStatus::parse(auth.as_str()), Some(auth));
        }
    }
}
