//! The [`ActivityRecorder`] interface.

use async_trait::async_trait;
use robolink_types::{ActivityRecord, ActivityType, LogError, LogId, Severity};
use serde_json::Value;

/// Destination for audit-log records.
///
/// Implementors only need [`deliver`][ActivityRecorder::deliver];
/// [`record`][ActivityRecorder::record] builds a fresh record stamped now.
#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    /// Record one activity and return the id it was stored under.
    async fn record(
        &self,
        user_id: &str,
        activity_type: ActivityType,
        detail: Value,
        severity: Severity,
    ) -> Result<LogId, LogError> {
        self.deliver(ActivityRecord::new(user_id, activity_type, detail, severity))
            .await
    }

    /// Store an already-built record, keeping its id and timestamp.
    async fn deliver(&self, record: ActivityRecord) -> Result<LogId, LogError>;

    /// Retry records that previously failed to deliver. Returns how many
    /// were delivered. Recorders without a local queue have nothing to do.
    async fn flush_pending(&self) -> usize {
        0
    }
}
