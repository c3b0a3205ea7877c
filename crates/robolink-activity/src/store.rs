//! Local activity log.
//!
//! Records are kept in a single SQLite table, `activity_log`:
//!
//! | column        | type    | description                                   |
//! |---------------|---------|-----------------------------------------------|
//! | seq           | INTEGER | insertion order                               |
//! | id            | TEXT    | UUID v4, unique                               |
//! | user_id       | TEXT    | operator that caused the activity             |
//! | activity_type | TEXT    | `login`, `robot_control`, ...                 |
//! | detail        | TEXT    | JSON document                                 |
//! | severity      | TEXT    | `info`, `warning`, `error`, `critical`        |
//! | timestamp     | TEXT    | RFC-3339 UTC, fixed microsecond precision     |
//!
//! The fixed-width timestamp keeps lexical and chronological order equal, so
//! range queries and retention run directly in SQL.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use robolink_types::{ActivityRecord, ActivityType, LogError, LogId};
use rusqlite::{Connection, Row, params};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::recorder::ActivityRecorder;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by the SQLite-backed stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<StoreError> for LogError {
    fn from(e: StoreError) -> Self {
        LogError::Storage(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row codec, shared with the fallback queue
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) const RECORD_COLUMNS: &str = "id, user_id, activity_type, detail, severity, timestamp";

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn insert_record(
    conn: &Connection,
    table: &str,
    record: &ActivityRecord,
) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {table} ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        ),
        params![
            record.id.to_string(),
            record.user_id,
            record.activity_type.as_str(),
            record.detail.to_string(),
            record.severity.as_str(),
            format_timestamp(&record.timestamp),
        ],
    )?;
    Ok(())
}

type RawRow = (String, String, String, String, String, String);

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_row(raw: RawRow) -> Result<ActivityRecord, StoreError> {
    let (id, user_id, activity_type, detail, severity, timestamp) = raw;
    Ok(ActivityRecord {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(format!("id: {e}")))?,
        user_id,
        activity_type: activity_type.parse().map_err(StoreError::Corrupt)?,
        detail: serde_json::from_str(&detail)
            .map_err(|e| StoreError::Corrupt(format!("detail: {e}")))?,
        severity: severity.parse().map_err(StoreError::Corrupt)?,
        timestamp: timestamp
            .parse::<DateTime<Utc>>()
            .map_err(|e| StoreError::Corrupt(format!("timestamp: {e}")))?,
    })
}

/// Run `sql` with `params` and decode every row as an [`ActivityRecord`].
pub(crate) fn query_records<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<ActivityRecord>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, raw_row)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(decode_row(row?)?);
    }
    Ok(records)
}

// ─────────────────────────────────────────────────────────────────────────────
// ActivityLog
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed activity log.
///
/// # Example
///
/// ```rust
/// use robolink_activity::ActivityLog;
/// use robolink_types::{ActivityRecord, ActivityType, Severity};
///
/// let log = ActivityLog::open_in_memory().unwrap();
/// let record = ActivityRecord::new(
///     "op-7",
///     ActivityType::RobotAccess,
///     serde_json::json!({ "robot": "dog" }),
///     Severity::Info,
/// );
/// log.insert(&record).unwrap();
/// assert_eq!(log.recent(10).unwrap()[0].id, record.id);
/// ```
pub struct ActivityLog {
    conn: Mutex<Connection>,
}

impl ActivityLog {
    /// Open (or create) a persistent log at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Open a temporary in-memory log.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS activity_log (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                id            TEXT NOT NULL UNIQUE,
                user_id       TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                detail        TEXT NOT NULL,
                severity      TEXT NOT NULL,
                timestamp     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS activity_log_timestamp ON activity_log (timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist `record`. Re-inserting the same id replaces the row.
    pub fn insert(&self, record: &ActivityRecord) -> Result<(), StoreError> {
        insert_record(&self.conn(), "activity_log", record)
    }

    /// The `limit` newest records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ActivityRecord>, StoreError> {
        query_records(
            &self.conn(),
            &format!(
                "SELECT {RECORD_COLUMNS} FROM activity_log
                 ORDER BY timestamp DESC, seq DESC LIMIT ?1"
            ),
            params![limit as i64],
        )
    }

    /// The `limit` newest records of one type, newest first.
    pub fn by_type(
        &self,
        activity_type: ActivityType,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, StoreError> {
        query_records(
            &self.conn(),
            &format!(
                "SELECT {RECORD_COLUMNS} FROM activity_log
                 WHERE activity_type = ?1
                 ORDER BY timestamp DESC, seq DESC LIMIT ?2"
            ),
            params![activity_type.as_str(), limit as i64],
        )
    }

    /// Records with `start <= timestamp <= end`, newest first.
    pub fn between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, StoreError> {
        query_records(
            &self.conn(),
            &format!(
                "SELECT {RECORD_COLUMNS} FROM activity_log
                 WHERE timestamp >= ?1 AND timestamp <= ?2
                 ORDER BY timestamp DESC, seq DESC"
            ),
            params![format_timestamp(&start), format_timestamp(&end)],
        )
    }

    /// Delete every record older than `cutoff`. Returns how many went.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let removed = self.conn().execute(
            "DELETE FROM activity_log WHERE timestamp < ?1",
            params![format_timestamp(&cutoff)],
        )?;
        debug!(removed, cutoff = %cutoff, "purged activity log");
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM activity_log", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ActivityRecorder for ActivityLog {
    async fn deliver(&self, record: ActivityRecord) -> Result<LogId, LogError> {
        self.insert(&record)?;
        Ok(record.id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
