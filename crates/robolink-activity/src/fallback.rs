//! Delivery fallback for the activity log.
//!
//! [`BestEffortRecorder`] wraps another recorder (typically an
//! [`HttpCollector`][crate::HttpCollector]). A record that fails to deliver
//! is parked in a [`FallbackQueue`] and the caller still gets
//! [`LogError::DeliveryFailed`]. [`ActivityRecorder::flush_pending`] later
//! re-delivers parked records oldest first and removes exactly the ones that
//! made it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use robolink_types::{ActivityRecord, LogError, LogId};
use rusqlite::{Connection, params};
use tracing::{debug, warn};

use crate::recorder::ActivityRecorder;
use crate::store::{RECORD_COLUMNS, StoreError, insert_record, query_records};

/// SQLite-backed queue of records awaiting delivery.
pub struct FallbackQueue {
    conn: Mutex<Connection>,
}

impl FallbackQueue {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pending_activity (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                id            TEXT NOT NULL UNIQUE,
                user_id       TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                detail        TEXT NOT NULL,
                severity      TEXT NOT NULL,
                timestamp     TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, record: &ActivityRecord) -> Result<(), StoreError> {
        insert_record(&self.conn(), "pending_activity", record)
    }

    /// Every queued record, in the order it was queued.
    pub fn pending(&self) -> Result<Vec<ActivityRecord>, StoreError> {
        query_records(
            &self.conn(),
            &format!("SELECT {RECORD_COLUMNS} FROM pending_activity ORDER BY seq ASC"),
            [],
        )
    }

    /// Remove the records with the given ids. Returns how many were found.
    pub fn remove(&self, ids: &[LogId]) -> Result<usize, StoreError> {
        let conn = self.conn();
        let mut removed = 0;
        for id in ids {
            removed += conn.execute(
                "DELETE FROM pending_activity WHERE id = ?1",
                params![id.to_string()],
            )?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM pending_activity", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// Recorder that never loses a record to a transient delivery failure.
pub struct BestEffortRecorder {
    inner: Arc<dyn ActivityRecorder>,
    queue: FallbackQueue,
    flushing: tokio::sync::Mutex<()>,
}

impl BestEffortRecorder {
    pub fn new(inner: Arc<dyn ActivityRecorder>, queue: FallbackQueue) -> Self {
        Self {
            inner,
            queue,
            flushing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &FallbackQueue {
        &self.queue
    }
}

#[async_trait]
impl ActivityRecorder for BestEffortRecorder {
    async fn deliver(&self, record: ActivityRecord) -> Result<LogId, LogError> {
        match self.inner.deliver(record.clone()).await {
            Ok(id) => Ok(id),
            Err(e) => {
                warn!(id = %record.id, error = %e, "activity delivery failed, queued locally");
                self.queue.push(&record)?;
                Err(LogError::DeliveryFailed(e.to_string()))
            }
        }
    }

    async fn flush_pending(&self) -> usize {
        // Overlapping flushes would deliver the same record twice.
        let Ok(_guard) = self.flushing.try_lock() else {
            return 0;
        };
        let pending = match self.queue.pending() {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "cannot read fallback queue");
                return 0;
            }
        };
        if pending.is_empty() {
            return 0;
        }

        let mut delivered = Vec::new();
        for record in pending {
            let id = record.id;
            match self.inner.deliver(record).await {
                Ok(_) => delivered.push(id),
                Err(e) => debug!(id = %id, error = %e, "queued record still undeliverable"),
            }
        }
        if let Err(e) = self.queue.remove(&delivered) {
            warn!(error = %e, "cannot trim fallback queue");
        }
        debug!(delivered = delivered.len(), "flushed fallback queue");
        delivered.len()
    }
}
