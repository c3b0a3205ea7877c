//! Fire-and-forget bridge from a link session to the activity log.
//!
//! Every call queues the record and returns at once, so a slow or broken log
//! can never delay or fail a robot operation. One worker per reporter drains
//! the queue, so records reach the recorder in the order they were made.
//! Failures are logged at `debug` and otherwise dropped.

use std::sync::{Arc, Mutex, PoisonError};

use robolink_activity::ActivityRecorder;
use robolink_transport::wire;
use robolink_types::{ActivityType, Command, RobotId, Severity, TransportError};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

enum Job {
    Record {
        activity_type: ActivityType,
        detail: Value,
        severity: Severity,
    },
    Flush,
}

/// Queue shared by every clone of one reporter. The worker is started on
/// the first job, from inside the runtime.
struct Outbox {
    recorder: Arc<dyn ActivityRecorder>,
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
}

impl Outbox {
    fn new(recorder: Arc<dyn ActivityRecorder>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            recorder,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    fn push(&self, user_id: &str, job: Job) {
        if self.tx.send(job).is_err() {
            return;
        }
        let mut slot = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime yet, activity stays queued");
            return;
        };
        if let Some(rx) = slot.take() {
            handle.spawn(drain(Arc::clone(&self.recorder), user_id.to_string(), rx));
        }
    }
}

async fn drain(
    recorder: Arc<dyn ActivityRecorder>,
    user_id: String,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Record {
                activity_type,
                detail,
                severity,
            } => {
                if let Err(e) = recorder
                    .record(&user_id, activity_type, detail, severity)
                    .await
                {
                    debug!(activity_type = %activity_type, error = %e, "activity not recorded");
                }
            }
            Job::Flush => {
                let delivered = recorder.flush_pending().await;
                if delivered > 0 {
                    debug!(delivered, "re-delivered queued activity records");
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct ActivityReporter {
    outbox: Option<Arc<Outbox>>,
    user_id: String,
    robot: RobotId,
}

impl ActivityReporter {
    pub fn new(recorder: Arc<dyn ActivityRecorder>, user_id: impl Into<String>, robot: RobotId) -> Self {
        Self {
            outbox: Some(Arc::new(Outbox::new(recorder))),
            user_id: user_id.into(),
            robot,
        }
    }

    /// A reporter that records nothing.
    pub fn disabled(robot: RobotId) -> Self {
        Self {
            outbox: None,
            user_id: String::new(),
            robot,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn submit(&self, job: Job) {
        if let Some(outbox) = &self.outbox {
            outbox.push(&self.user_id, job);
        }
    }

    fn queue_record(&self, activity_type: ActivityType, detail: Value, severity: Severity) {
        self.submit(Job::Record {
            activity_type,
            detail,
            severity,
        });
    }

    /// `robot_access` entry for a link lifecycle event (`connected`, `lost`,
    /// `degraded`, `closed`).
    pub fn access(&self, event: &str, reason: Option<&str>, severity: Severity) {
        let mut detail = json!({ "robot": self.robot.as_str(), "event": event });
        if let Some(reason) = reason {
            detail["reason"] = Value::String(reason.to_string());
        }
        self.queue_record(ActivityType::RobotAccess, detail, severity);
    }

    /// `robot_control` entry for an accepted command.
    pub fn command(&self, command: &Command, degraded: bool) {
        let mut detail = wire::command_fields(command);
        detail.insert("robot".into(), json!(self.robot.as_str()));
        detail.insert("action".into(), json!(command.kind.name()));
        detail.insert(
            "correlation_id".into(),
            json!(command.correlation_id.to_string()),
        );
        if degraded {
            detail.insert("degraded".into(), json!(true));
        }
        self.queue_record(ActivityType::RobotControl, Value::Object(detail), Severity::Info);
    }

    /// `error` entry for a transport failure.
    pub fn transport_error(&self, error: &TransportError) {
        let kind = match error {
            TransportError::Unreachable(_) => "unreachable",
            TransportError::Protocol(_) => "protocol",
            TransportError::Closed => "closed",
        };
        let detail = json!({
            "robot": self.robot.as_str(),
            "kind": kind,
            "error": error.to_string(),
        });
        self.queue_record(ActivityType::Error, detail, Severity::Error);
    }

    /// Retry queued records in the background, after everything already
    /// reported.
    pub fn flush(&self) {
        self.submit(Job::Flush);
    }
}
