//! The Transport contract.
//!
//! A [`Transport`] owns the network side of one robot link. Outbound traffic
//! goes through [`Transport::send`]; everything the robot says back (and
//! every change in reachability) is pushed as a [`TransportEvent`] into the
//! [`EventSink`] handed over in [`Transport::connect`].
//!
//! Two network implementations exist, selected by [`TransportKind`]:
//!
//! | Kind | Implementation | Outbound | Inbound |
//! |---|---|---|---|
//! | [`TransportKind::HttpPoll`] | [`HttpPollTransport`] | `POST` per command, acked | status `GET` every poll interval |
//! | [`TransportKind::Socket`] | [`SocketTransport`] | `control_command` event, fire-and-forget | `frame` / `status_update` events |
//! | [`TransportKind::Loopback`] | [`LoopbackTransport`] | recorded in memory | injected by the caller |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use robolink_types::{Ack, Command, Frame, StatusPatch, TransportError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::http_poll::HttpPollTransport;
use crate::loopback::LoopbackTransport;
use crate::profile::RobotProfile;
use crate::socket::SocketTransport;

/// Which concrete transport a robot uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    HttpPoll,
    Socket,
    Loopback,
}

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The channel is (re-)established.
    Connected,
    /// The robot answered a liveness check but reported no status fields.
    Heartbeat { at: DateTime<Utc> },
    /// Partial status report.
    Status(StatusPatch),
    /// New video frame.
    Frame(Frame),
    /// A poll, request or inbound message failed. The transport keeps going.
    Error(TransportError),
    /// The socket lost its connection and is dialing attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// The transport gave up; no further events follow.
    Closed,
}

/// Outcome of a successful [`Transport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The controller answered the request.
    Acked(Ack),
    /// The command was queued on an open socket; no answer is expected.
    Dispatched,
}

/// Producer half of the transport → link event channel.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;
/// Consumer half of the transport → link event channel.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Create a fresh event channel.
pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

/// Every robot transport implements this trait.
///
/// # Contract
///
/// * `connect` – establish the channel and start any background receive or
///   poll task. Returns once the first handshake succeeded or failed. Events
///   go to `events` until [`close`][Transport::close] is called.
///
/// * `send` – deliver one command, at most once. A failed command is never
///   retried by the transport: a motion replayed late is worse than a motion
///   lost.
///
/// * `close` – stop all background tasks. Idempotent.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn connect(&self, events: EventSink) -> Result<(), TransportError>;

    async fn send(&self, command: &Command) -> Result<Delivery, TransportError>;

    async fn close(&self);
}

/// Build the transport described by `profile`.
pub fn build(profile: &RobotProfile) -> Result<Arc<dyn Transport>, TransportError> {
    let transport: Arc<dyn Transport> = match profile.transport {
        TransportKind::HttpPoll => Arc::new(HttpPollTransport::new(profile.clone())?),
        TransportKind::Socket => Arc::new(SocketTransport::new(profile)),
        TransportKind::Loopback => Arc::new(LoopbackTransport::with_simulated_telemetry(
            profile.telemetry_interval(),
        )),
    };
    Ok(transport)
}
