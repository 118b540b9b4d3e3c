//! Authorization resolution against the visitor directory.
//!
//! The directory is an external, read-only collaborator; its records arrive
//! with loosely typed fields and window endpoints in any of three timestamp
//! encodings. The resolver maps all of that onto a single answer for "may
//! this plate pass right now". It never propagates an error: lookup
//! failures, missing windows, and unparsable endpoints all resolve to
//! [`AuthStatus::Unauthorized`]. Denial is the default; only explicit,
//! well-formed data grants access.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{open_db_connection, parse_utc_timestamp, AuthStatus};

/// A window endpoint as the directory delivers it: a native epoch-seconds
/// number, a `{"seconds": …}` record, or an ISO-8601 string with an offset
/// or `Z` suffix. Unparsable content stays representable (as an `Iso` string
/// that fails conversion) instead of becoming an error.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TimestampValue {
    Seconds { seconds: i64 },
    Epoch(f64),
    Iso(String),
}

impl TimestampValue {
    /// Normalize to a UTC instant. `None` means the endpoint is unusable and
    /// the caller must fail closed.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            TimestampValue::Seconds { seconds } => DateTime::from_timestamp(*seconds, 0),
            TimestampValue::Epoch(epoch) => {
                if !epoch.is_finite() {
                    return None;
                }
                let secs = epoch.trunc() as i64;
                let nanos = ((epoch - epoch.trunc()) * 1e9) as u32;
                DateTime::from_timestamp(secs, nanos)
            }
            TimestampValue::Iso(raw) => parse_utc_timestamp(raw),
        }
    }
}

/// Authorization window on a visitor-class record. Endpoints are optional;
/// a present endpoint that fails to parse denies access.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthWindow {
    pub from: Option<TimestampValue>,
    pub to: Option<TimestampValue>,
}

impl AuthWindow {
    /// True when `now` falls inside the window. Both boundaries are
    /// inclusive. A window with no usable endpoint at all admits nobody.
    pub fn admits(&self, now: DateTime<Utc>) -> bool {
        if self.from.is_none() && self.to.is_none() {
            return false;
        }
        if let Some(from) = &self.from {
            match from.to_utc() {
                Some(start) => {
                    if now < start {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if let Some(to) = &self.to {
            match to.to_utc() {
                Some(end) => {
                    if now > end {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

/// One directory record, keyed by plate. `visitor_type` is foreign data and
/// compared case-insensitively; anything other than "authorized" or an
/// approved "visitor" denies access.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VisitorRecord {
    pub plate: String,
    pub visitor_type: String,
    pub approved: bool,
    pub window: Option<AuthWindow>,
}

/// Read-side interface to the visitor directory.
pub trait VisitorDirectory: Send {
    /// Zero or one record for the plate. Errors are the caller's problem
    /// only insofar as they must resolve them to a denial.
    fn lookup(&self, plate: &str) -> Result<Option<VisitorRecord>>;
}

/// Resolve the authorization class for a plate at `now`.
///
/// This function always returns a decision; every failure mode inside it is
/// logged and mapped to `Unauthorized`.
pub fn resolve_authorization(
    directory: &dyn VisitorDirectory,
    plate: &str,
    now: DateTime<Utc>,
) -> AuthStatus {
    let record = match directory.lookup(plate) {
        Ok(Some(record)) => record,
        Ok(None) => {
            log::debug!("plate {}: not in visitor directory", plate);
            return AuthStatus::Unauthorized;
        }
        Err(err) => {
            log::warn!("visitor directory lookup failed for {}: {}", plate, err);
            return AuthStatus::Unauthorized;
        }
    };

    let visitor_type = record.visitor_type.to_lowercase();
    if visitor_type == "authorized" {
        return AuthStatus::Authorized;
    }
    if visitor_type == "visitor" && record.approved {
        let Some(window) = &record.window else {
            // Possibly a data-entry gap; surfaced so operators can fix the
            // record, but access stays denied.
            log::warn!("plate {}: approved visitor without a window, denying", plate);
            return AuthStatus::Unauthorized;
        };
        return if window.admits(now) {
            AuthStatus::Visitor
        } else {
            AuthStatus::Unauthorized
        };
    }
    AuthStatus::Unauthorized
}

// ----------------------------------------------------------------------------
// Directory implementations
// ----------------------------------------------------------------------------

/// SQLite-backed visitor directory. Window endpoints are stored as the JSON
/// the directory delivered, so all three encodings survive storage intact.
pub struct SqliteVisitorDirectory {
    conn: Connection,
}

impl SqliteVisitorDirectory {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let dir = Self { conn };
        dir.ensure_schema()?;
        Ok(dir)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS visitors (
              plate TEXT PRIMARY KEY,
              visitor_type TEXT NOT NULL,
              approved INTEGER NOT NULL DEFAULT 1,
              window_from TEXT,
              window_to TEXT
            );
            "#,
        )?;
        Ok(())
    }

    pub fn upsert(&self, record: &VisitorRecord) -> Result<()> {
        let (window_from, window_to) = match &record.window {
            Some(window) => (
                window
                    .from
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                window.to.as_ref().map(serde_json::to_string).transpose()?,
            ),
            None => (None, None),
        };
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO visitors(plate, visitor_type, approved, window_from, window_to)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.plate,
                record.visitor_type,
                record.approved as i64,
                window_from,
                window_to,
            ],
        )?;
        Ok(())
    }
}

impl VisitorDirectory for SqliteVisitorDirectory {
    fn lookup(&self, plate: &str) -> Result<Option<VisitorRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT visitor_type, approved, window_from, window_to FROM visitors WHERE plate = ?1",
                params![plate],
                |row| {
                    let visitor_type: String = row.get(0)?;
                    let approved: i64 = row.get(1)?;
                    let window_from: Option<String> = row.get(2)?;
                    let window_to: Option<String> = row.get(3)?;
                    Ok((visitor_type, approved, window_from, window_to))
                },
            )
            .optional()?;

        let Some((visitor_type, approved, window_from, window_to)) = row else {
            return Ok(None);
        };

        let from = window_from.as_deref().map(parse_endpoint);
        let to = window_to.as_deref().map(parse_endpoint);
        let window = if from.is_none() && to.is_none() {
            None
        } else {
            Some(AuthWindow { from, to })
        };
        Ok(Some(VisitorRecord {
            plate: plate.to_string(),
            visitor_type,
            approved: approved != 0,
            window,
        }))
    }
}

/// A stored endpoint that is not valid JSON is kept as a raw string; its
/// conversion to UTC will fail and the resolver will deny.
fn parse_endpoint(raw: &str) -> TimestampValue {
    serde_json::from_str(raw).unwrap_or_else(|_| TimestampValue::Iso(raw.to_string()))
}

/// In-memory directory for tests and stub deployments.
#[derive(Clone, Debug, Default)]
pub struct InMemoryVisitorDirectory {
    records: HashMap<String, VisitorRecord>,
}

impl InMemoryVisitorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: VisitorRecord) {
        self.records.insert(record.plate.clone(), record);
    }
}

impl VisitorDirectory for InMemoryVisitorDirectory {
    fn lookup(&self, plate: &str) -> Result<Option<VisitorRecord>> {
        Ok(self.records.get(plate).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::TimeZone;

    fn visitor_record(plate: &str, window: Option<AuthWindow>) -> VisitorRecord {
        VisitorRecord {
            plate: plate.to_string(),
            visitor_type: "visitor".to_string(),
            approved: true,
            window,
        }
    }

    fn directory_with(record: VisitorRecord) -> InMemoryVisitorDirectory {
        let mut dir = InMemoryVisitorDirectory::new();
        dir.insert(record);
        dir
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn unknown_plate_is_unauthorized() {
        let dir = InMemoryVisitorDirectory::new();
        assert_eq!(
            resolve_authorization(&dir, "AB1234", Utc::now()),
            AuthStatus::Unauthorized
        );
    }

    #[test]
    fn authorized_class_has_no_time_restriction() {
        let dir = directory_with(VisitorRecord {
            plate: "AB1234".to_string(),
            visitor_type: "Authorized".to_string(),
            approved: false,
            window: None,
        });
        assert_eq!(
            resolve_authorization(&dir, "AB1234", Utc::now()),
            AuthStatus::Authorized
        );
    }

    #[test]
    fn visitor_window_boundaries_are_inclusive() {
        let window = AuthWindow {
            from: Some(TimestampValue::Seconds { seconds: 1_000 }),
            to: Some(TimestampValue::Seconds { seconds: 2_000 }),
        };
        let dir = directory_with(visitor_record("AB1234", Some(window)));

        assert_eq!(
            resolve_authorization(&dir, "AB1234", t(999)),
            AuthStatus::Unauthorized
        );
        assert_eq!(
            resolve_authorization(&dir, "AB1234", t(1_000)),
            AuthStatus::Visitor
        );
        assert_eq!(
            resolve_authorization(&dir, "AB1234", t(1_500)),
            AuthStatus::Visitor
        );
        assert_eq!(
            resolve_authorization(&dir, "AB1234", t(2_000)),
            AuthStatus::Visitor
        );
        assert_eq!(
            resolve_authorization(&dir, "AB1234", t(2_001)),
            AuthStatus::Unauthorized
        );
    }

    #[test]
    fn all_three_encodings_normalize_identically() {
        let instant = t(1_700_000_000);
        let encodings = [
            TimestampValue::Seconds {
                seconds: 1_700_000_000,
            },
            TimestampValue::Epoch(1_700_000_000.0),
            TimestampValue::Iso("2023-11-14T22:13:20Z".to_string()),
        ];
        for encoding in encodings {
            assert_eq!(encoding.to_utc(), Some(instant), "{:?}", encoding);
        }
    }

    #[test]
    fn untagged_decoding_picks_the_right_variant() {
        let seconds: TimestampValue = serde_json::from_str(r#"{"seconds": 42}"#).unwrap();
        assert_eq!(seconds, TimestampValue::Seconds { seconds: 42 });
        let epoch: TimestampValue = serde_json::from_str("42.5").unwrap();
        assert_eq!(epoch, TimestampValue::Epoch(42.5));
        let iso: TimestampValue = serde_json::from_str(r#""2023-11-14T22:13:20Z""#).unwrap();
        assert_eq!(iso, TimestampValue::Iso("2023-11-14T22:13:20Z".to_string()));
    }

    #[test]
    fn unparsable_endpoint_fails_closed() {
        let window = AuthWindow {
            from: Some(TimestampValue::Iso("soonish".to_string())),
            to: Some(TimestampValue::Seconds { seconds: i64::MAX }),
        };
        let dir = directory_with(visitor_record("AB1234", Some(window)));
        assert_eq!(
            resolve_authorization(&dir, "AB1234", Utc::now()),
            AuthStatus::Unauthorized
        );
    }

    #[test]
    fn missing_window_fails_closed() {
        let dir = directory_with(visitor_record("AB1234", None));
        assert_eq!(
            resolve_authorization(&dir, "AB1234", Utc::now()),
            AuthStatus::Unauthorized
        );
        let empty = directory_with(visitor_record("CD5678", Some(AuthWindow::default())));
        assert_eq!(
            resolve_authorization(&empty, "CD5678", Utc::now()),
            AuthStatus::Unauthorized
        );
    }

    #[test]
    fn one_sided_windows_check_the_present_endpoint() {
        let open_ended = AuthWindow {
            from: Some(TimestampValue::Seconds { seconds: 1_000 }),
            to: None,
        };
        let dir = directory_with(visitor_record("AB1234", Some(open_ended)));
        assert_eq!(
            resolve_authorization(&dir, "AB1234", t(500)),
            AuthStatus::Unauthorized
        );
        assert_eq!(
            resolve_authorization(&dir, "AB1234", t(5_000)),
            AuthStatus::Visitor
        );
    }

    #[test]
    fn unapproved_visitor_is_unauthorized() {
        let mut record = visitor_record(
            "AB1234",
            Some(AuthWindow {
                from: Some(TimestampValue::Seconds { seconds: 0 }),
                to: Some(TimestampValue::Seconds { seconds: i64::from(u32::MAX) }),
            }),
        );
        record.approved = false;
        let dir = directory_with(record);
        assert_eq!(
            resolve_authorization(&dir, "AB1234", t(1_000)),
            AuthStatus::Unauthorized
        );
    }

    #[test]
    fn unknown_class_is_unauthorized() {
        let dir = directory_with(VisitorRecord {
            plate: "AB1234".to_string(),
            visitor_type: "contractor".to_string(),
            approved: true,
            window: None,
        });
        assert_eq!(
            resolve_authorization(&dir, "AB1234", Utc::now()),
            AuthStatus::Unauthorized
        );
    }

    struct BrokenDirectory;

    impl VisitorDirectory for BrokenDirectory {
        fn lookup(&self, _plate: &str) -> Result<Option<VisitorRecord>> {
            Err(anyhow!("directory offline"))
        }
    }

    #[test]
    fn lookup_error_resolves_to_unauthorized() {
        assert_eq!(
            resolve_authorization(&BrokenDirectory, "ZZ0001", Utc::now()),
            AuthStatus::Unauthorized
        );
    }

    #[test]
    fn sqlite_directory_round_trips_windows() -> Result<()> {
        let dir = SqliteVisitorDirectory::open(&crate::shared_memory_uri())?;
        let record = visitor_record(
            "KJ9021",
            Some(AuthWindow {
                from: Some(TimestampValue::Iso("2025-01-01T00:00:00Z".to_string())),
                to: Some(TimestampValue::Seconds {
                    seconds: 1_767_225_600,
                }),
            }),
        );
        dir.upsert(&record)?;
        let loaded = dir.lookup("KJ9021")?.expect("record present");
        assert_eq!(loaded, record);
        assert_eq!(dir.lookup("QQ0000")?, None);
        Ok(())
    }
}
