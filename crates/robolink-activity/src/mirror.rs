//! Local copy of remotely shipped records.
//!
//! [`MirroredRecorder`] writes every record to the local [`ActivityLog`]
//! before handing it to a remote recorder, so the console can always read
//! back what happened even when a collector owns the audit trail.

use std::sync::Arc;

use async_trait::async_trait;
use robolink_types::{ActivityRecord, LogError, LogId};
use tracing::warn;

use crate::recorder::ActivityRecorder;
use crate::store::ActivityLog;

pub struct MirroredRecorder {
    local: Arc<ActivityLog>,
    remote: Arc<dyn ActivityRecorder>,
}

impl MirroredRecorder {
    pub fn new(local: Arc<ActivityLog>, remote: Arc<dyn ActivityRecorder>) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl ActivityRecorder for MirroredRecorder {
    /// Returns the remote outcome. A local write failure is logged only.
    async fn deliver(&self, record: ActivityRecord) -> Result<LogId, LogError> {
        if let Err(e) = self.local.insert(&record) {
            warn!(id = %record.id, error = %e, "activity not mirrored locally");
        }
        self.remote.deliver(record).await
    }

    async fn flush_pending(&self) -> usize {
        self.remote.flush_pending().await
    }
}
