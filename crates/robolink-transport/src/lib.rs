//! `robolink-transport` – the wire between the console and a robot.
//!
//! A link never speaks HTTP or WebSocket directly. It holds a
//! [`Transport`] and reacts to the [`TransportEvent`]s the transport pushes
//! into its [`EventSink`].
//!
//! # Modules
//!
//! - [`transport`] – the [`Transport`] trait, transport events and
//!   [`build`][transport::build], which picks an implementation from a
//!   [`RobotProfile`].
//! - [`profile`] – [`RobotProfile`]: per-robot endpoints, payload routes and
//!   timing, expressed as configuration data.
//! - [`wire`] – JSON codec for HTTP bodies and socket envelopes.
//! - [`http_poll`] – [`HttpPollTransport`]: one `POST` per command plus a
//!   periodic status `GET`.
//! - [`socket`] – [`SocketTransport`]: one long-lived WebSocket with bounded,
//!   fixed-delay reconnection.
//! - [`loopback`] – [`LoopbackTransport`]: in-process double for tests and the
//!   CLI simulator.

pub mod http_poll;
pub mod loopback;
pub mod profile;
pub mod socket;
pub mod transport;
pub mod wire;

pub use http_poll::HttpPollTransport;
pub use loopback::LoopbackTransport;
pub use profile::{ActuatorRoute, ReconnectPolicy, RobotProfile, Routes};
pub use socket::{BoxMessageStream, BoxSink, Dialer, SocketTransport, WsDialer};
pub use transport::{
    Delivery, EventSink, EventStream, Transport, TransportEvent, TransportKind, build,
    event_channel,
};
