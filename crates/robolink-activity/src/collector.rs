//! Remote log collector.
//!
//! Posts each [`ActivityRecord`] as JSON to a log service endpoint. Any
//! network failure or non-2xx answer is a [`LogError::DeliveryFailed`]; wrap
//! the collector in a [`BestEffortRecorder`][crate::BestEffortRecorder] to
//! keep those records for later.

use std::time::Duration;

use async_trait::async_trait;
use robolink_types::{ActivityRecord, LogError, LogId};
use tracing::debug;

use crate::recorder::ActivityRecorder;

pub struct HttpCollector {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpCollector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, LogError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LogError::DeliveryFailed(format!("http client init: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ActivityRecorder for HttpCollector {
    async fn deliver(&self, record: ActivityRecord) -> Result<LogId, LogError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&record)
            .send()
            .await
            .map_err(|e| LogError::DeliveryFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LogError::DeliveryFailed(format!(
                "log service returned HTTP {status}"
            )));
        }
        debug!(id = %record.id, activity_type = %record.activity_type, "activity delivered");
        Ok(record.id)
    }
}
