//! Persistent access log.
//!
//! Append-only store of committed access events, shared by every frame
//! source. Full reads hand back only well-formed entries; rows that cannot
//! be parsed are excluded with a warning instead of failing the read. The
//! History Lookup is more forgiving: it needs only a row's timestamp, so a
//! row with an unrecognized status still counts as the latest sighting, with
//! its status reported as unknown. One malformed row must never stall the
//! pipeline either way.

use anyhow::Result;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::{
    format_utc_timestamp, open_db_connection, parse_utc_timestamp, AccessStatus, AuthStatus,
    LastEvent, LogEntry,
};

pub trait AccessLogStore: Send {
    /// Commit one entry. The entry is immutable once written.
    fn append(&mut self, entry: &LogEntry) -> Result<()>;

    /// All well-formed entries for a plate, in no particular order.
    fn entries_for_plate(&self, plate: &str) -> Result<Vec<LogEntry>>;

    /// All well-formed entries, in commit order.
    fn all_entries(&self) -> Result<Vec<LogEntry>>;

    /// History Lookup: the plate's latest persisted sighting by parsed
    /// timestamp, or none when the plate has never been logged. Only the
    /// timestamp has to parse; a row with unrecognized status text still
    /// counts, reported with an unknown status.
    fn latest_for_plate(&self, plate: &str) -> Result<Option<LastEvent>> {
        let mut entries = self.entries_for_plate(plate)?;
        // Stable sort; among equal timestamps the later-committed row wins.
        entries.sort_by_key(|entry| entry.timestamp);
        Ok(entries.pop().map(|entry| entry.last_event()))
    }
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

pub struct SqliteAccessLogStore {
    conn: Connection,
}

impl SqliteAccessLogStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS access_log (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              plate TEXT NOT NULL,
              status TEXT NOT NULL,
              visitor_status TEXT NOT NULL,
              timestamp TEXT NOT NULL,
              snapshot_url TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_access_log_plate ON access_log(plate);
            "#,
        )?;
        Ok(())
    }

    fn collect_rows(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<LogEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(args)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let plate: String = row.get(0)?;
            let status: String = row.get(1)?;
            let visitor_status: String = row.get(2)?;
            let timestamp: String = row.get(3)?;
            let snapshot_url: String = row.get(4)?;
            match parse_row(&plate, &status, &visitor_status, &timestamp, snapshot_url) {
                Some(entry) => out.push(entry),
                None => {
                    log::warn!(
                        "excluding malformed access_log row for plate {} (status={}, timestamp={})",
                        plate,
                        status,
                        timestamp
                    );
                }
            }
        }
        Ok(out)
    }
}

fn parse_row(
    plate: &str,
    status: &str,
    visitor_status: &str,
    timestamp: &str,
    snapshot_url: String,
) -> Option<LogEntry> {
    Some(LogEntry {
        plate: plate.to_string(),
        status: AccessStatus::parse(status)?,
        visitor_status: AuthStatus::parse(visitor_status)?,
        timestamp: parse_utc_timestamp(timestamp)?,
        snapshot_url,
    })
}

impl AccessLogStore for SqliteAccessLogStore {
    fn append(&mut self, entry: &LogEntry) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO access_log(plate, status, visitor_status, timestamp, snapshot_url)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                entry.plate,
                entry.status.as_str(),
                entry.visitor_status.as_str(),
                format_utc_timestamp(entry.timestamp),
                entry.snapshot_url,
            ],
        )?;
        Ok(())
    }

    fn entries_for_plate(&self, plate: &str) -> Result<Vec<LogEntry>> {
        self.collect_rows(
            "SELECT plate, status, visitor_status, timestamp, snapshot_url
             FROM access_log WHERE plate = ?1",
            &[&plate],
        )
    }

    fn all_entries(&self) -> Result<Vec<LogEntry>> {
        self.collect_rows(
            "SELECT plate, status, visitor_status, timestamp, snapshot_url
             FROM access_log ORDER BY id ASC",
            &[],
        )
    }

    fn latest_for_plate(&self, plate: &str) -> Result<Option<LastEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, timestamp FROM access_log WHERE plate = ?1 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![plate])?;
        let mut latest: Option<LastEvent> = None;
        while let Some(row) = rows.next()? {
            let status_text: String = row.get(0)?;
            let timestamp_text: String = row.get(1)?;
            let Some(timestamp) = parse_utc_timestamp(&timestamp_text) else {
                log::warn!(
                    "ignoring access_log row for plate {} with unparsable timestamp {}",
                    plate,
                    timestamp_text
                );
                continue;
            };
            let status = AccessStatus::parse(&status_text);
            if status.is_none() {
                log::warn!(
                    "access_log row for plate {} has unknown status {}; keeping its timestamp",
                    plate,
                    status_text
                );
            }
            // `>=` so among equal timestamps the later-committed row wins.
            if latest.map_or(true, |event| timestamp >= event.timestamp) {
                latest = Some(LastEvent { status, timestamp });
            }
        }
        Ok(latest)
    }
}

// ----------------------------------------------------------------------------
// In-memory store (tests, stub deployments)
// ----------------------------------------------------------------------------

/// Cloneable in-memory store; clones share the same entries, so a test can
/// keep a handle while the pipeline owns another.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAccessLogStore {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryAccessLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("access log lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccessLogStore for InMemoryAccessLogStore {
    fn append(&mut self, entry: &LogEntry) -> Result<()> {
        self.entries
            .lock()
            .expect("access log lock")
            .push(entry.clone());
        Ok(())
    }

    fn entries_for_plate(&self, plate: &str) -> Result<Vec<LogEntry>> {
        Ok(self
            .entries
            .lock()
            .expect("access log lock")
            .iter()
            .filter(|entry| entry.plate == plate)
            .cloned()
            .collect())
    }

    fn all_entries(&self) -> Result<Vec<LogEntry>> {
        Ok(self.entries.lock().expect("access log lock").clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn entry(plate: &str, status: AccessStatus, at: chrono::DateTime<Utc>) -> LogEntry {
        LogEntry {
            plate: plate.to_string(),
            status,
            visitor_status: AuthStatus::Authorized,
            timestamp: at,
            snapshot_url: "stub://snapshot".to_string(),
        }
    }

    #[test]
    fn append_and_read_back_round_trips() -> Result<()> {
        let mut store = SqliteAccessLogStore::open(&crate::shared_memory_uri())?;
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let written = entry("AB1234", AccessStatus::Entry, at);
        store.append(&written)?;

        let read = store.entries_for_plate("AB1234")?;
        assert_eq!(read, vec![written.clone()]);
        let last = store.latest_for_plate("AB1234")?.expect("entry present");
        assert_eq!(last, written.last_event());
        Ok(())
    }

    #[test]
    fn latest_picks_newest_not_newest_inserted() -> Result<()> {
        let mut store = SqliteAccessLogStore::open(&crate::shared_memory_uri())?;
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        store.append(&entry("AB1234", AccessStatus::Exit, base + Duration::hours(2)))?;
        store.append(&entry("AB1234", AccessStatus::Entry, base))?;
        store.append(&entry("XY9999", AccessStatus::Blocked, base + Duration::hours(5)))?;

        let latest = store.latest_for_plate("AB1234")?.expect("entry present");
        assert_eq!(latest.status, Some(AccessStatus::Exit));
        Ok(())
    }

    #[test]
    fn unknown_plate_is_none_not_error() -> Result<()> {
        let store = SqliteAccessLogStore::open(&crate::shared_memory_uri())?;
        assert_eq!(store.latest_for_plate("ZZ0001")?, None);
        Ok(())
    }

    #[test]
    fn unparsable_timestamp_rows_never_surface() -> Result<()> {
        let mut store = SqliteAccessLogStore::open(&crate::shared_memory_uri())?;
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        store.append(&entry("AB1234", AccessStatus::Entry, base))?;

        // Rows written by older or foreign software may carry text the
        // current parser rejects.
        store.conn.execute(
            "INSERT INTO access_log(plate, status, visitor_status, timestamp, snapshot_url)
             VALUES ('AB1234', 'entry', 'authorized', 'yesterday-ish', 'x')",
            [],
        )?;

        let latest = store.latest_for_plate("AB1234")?.expect("entry present");
        assert_eq!(latest.timestamp, base);
        assert_eq!(latest.status, Some(AccessStatus::Entry));
        assert_eq!(store.entries_for_plate("AB1234")?.len(), 1);
        Ok(())
    }

    #[test]
    fn unknown_status_rows_keep_their_timestamp_in_lookup() -> Result<()> {
        let mut store = SqliteAccessLogStore::open(&crate::shared_memory_uri())?;
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        store.append(&entry("AB1234", AccessStatus::Entry, base))?;
        store.conn.execute(
            "INSERT INTO access_log(plate, status, visitor_status, timestamp, snapshot_url)
             VALUES ('AB1234', 'loitering', 'authorized', '2025-06-01T13:00:00Z', 'x')",
            [],
        )?;

        // The lookup reports the newer sighting even though its status text
        // is not one the state machine knows; full reads still exclude it.
        let latest = store.latest_for_plate("AB1234")?.expect("entry present");
        assert_eq!(latest.status, None);
        assert_eq!(latest.timestamp, base + Duration::hours(1));
        assert_eq!(store.entries_for_plate("AB1234")?.len(), 1);
        Ok(())
    }

    #[test]
    fn in_memory_clones_share_entries() -> Result<()> {
        let handle = InMemoryAccessLogStore::new();
        let mut writer = handle.clone();
        writer.append(&entry("AB1234", AccessStatus::Entry, Utc::now()))?;
        assert_eq!(handle.len(), 1);
        assert_eq!(handle.all_entries()?.len(), 1);
        Ok(())
    }
}
