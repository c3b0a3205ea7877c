//! HTTP request/response transport with periodic status polling.
//!
//! Used by the robots whose controllers expose a small REST surface (Pepper,
//! the arm, the climbing robot):
//!
//! * **Outbound** – every command is one `POST`, answered with
//!   `{ "message": string }`. A timeout, a non-2xx status or an unreadable
//!   body fails the call; the command is never resent.
//!
//! * **Inbound** – a background task `GET`s the status route every poll
//!   interval. A 2xx answer is a [`TransportEvent::Heartbeat`], followed by a
//!   [`TransportEvent::Status`] when the body is a JSON object. Each patch is
//!   stamped with the time its poll was *issued*, so a slow poll can never
//!   overwrite the result of a later one.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use robolink_types::{Command, StatusPatch, TransportError};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::profile::RobotProfile;
use crate::transport::{Delivery, EventSink, Transport, TransportEvent, TransportKind};
use crate::wire;

/// Transport for REST-style robot controllers.
pub struct HttpPollTransport {
    profile: RobotProfile,
    client: reqwest::Client,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl HttpPollTransport {
    /// Create a transport for `profile`. Every request made through it is
    /// bounded by the profile's request timeout.
    pub fn new(profile: RobotProfile) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(profile.request_timeout())
            .build()
            .map_err(|e| TransportError::Unreachable(format!("http client init: {e}")))?;
        Ok(Self {
            profile,
            client,
            poller: Mutex::new(None),
        })
    }

    pub fn profile(&self) -> &RobotProfile {
        &self.profile
    }

    fn stop_poller(&self) {
        if let Ok(mut slot) = self.poller.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

/// Query the status route once.
///
/// Returns `Ok(None)` for a 2xx answer whose body is not a JSON object (e.g.
/// Pepper's HTML index page).
async fn check_status(
    client: &reqwest::Client,
    url: &str,
    issued_at: DateTime<Utc>,
) -> Result<Option<StatusPatch>, TransportError> {
    let response = client.get(url).send().await.map_err(classify)?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Protocol(format!("status check returned HTTP {status}")));
    }
    let body = response.bytes().await.map_err(classify)?;
    match serde_json::from_slice::<Value>(&body) {
        Ok(value) if value.is_object() => Ok(Some(wire::decode_status(&value, issued_at))),
        _ => Ok(None),
    }
}

/// Map a `reqwest` failure onto the transport error taxonomy.
fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Unreachable(format!("request timed out: {e}"))
    } else if e.is_decode() {
        TransportError::Protocol(e.to_string())
    } else {
        TransportError::Unreachable(e.to_string())
    }
}

fn publish_status(events: &EventSink, issued_at: DateTime<Utc>, patch: Option<StatusPatch>) {
    let _ = events.send(TransportEvent::Heartbeat { at: issued_at });
    if let Some(patch) = patch {
        let _ = events.send(TransportEvent::Status(patch));
    }
}

#[async_trait]
impl Transport for HttpPollTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::HttpPoll
    }

    async fn connect(&self, events: EventSink) -> Result<(), TransportError> {
        self.stop_poller();
        let url = self.profile.url(&self.profile.routes.status);
        let issued_at = Utc::now();
        let first = check_status(&self.client, &url, issued_at).await?;

        info!(robot = %self.profile.robot, url = %url, "http link established");
        let _ = events.send(TransportEvent::Connected);
        publish_status(&events, issued_at, first);

        let client = self.client.clone();
        let interval = self.profile.poll_interval();
        let robot = self.profile.robot;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if events.is_closed() {
                    break;
                }
                let issued_at = Utc::now();
                match check_status(&client, &url, issued_at).await {
                    Ok(patch) => publish_status(&events, issued_at, patch),
                    Err(e) => {
                        warn!(robot = %robot, error = %e, "status poll failed");
                        let _ = events.send(TransportEvent::Error(e));
                    }
                }
            }
            debug!(robot = %robot, "status poller stopped");
        });
        if let Ok(mut slot) = self.poller.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    async fn send(&self, command: &Command) -> Result<Delivery, TransportError> {
        let request = wire::http_request(&self.profile.routes, command);
        let url = self.profile.url(&request.path);
        debug!(
            robot = %self.profile.robot,
            url = %url,
            correlation_id = %command.correlation_id,
            "posting command"
        );

        let builder = self.client.post(&url);
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };
        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Protocol(format!(
                "{} returned HTTP {status}",
                request.path
            )));
        }
        let body = response.bytes().await.map_err(classify)?;
        wire::decode_ack(&body).map(Delivery::Acked)
    }

    async fn close(&self) {
        self.stop_poller();
    }
}

impl Drop for HttpPollTransport {
    fn drop(&mut self) {
        self.stop_poller();
    }
}
