//! `robolink-session` – the console side of a robot link.
//!
//! A [`LinkSession`] owns one [`Transport`][robolink_transport::Transport],
//! tracks a coarse [`ConnectionState`][robolink_types::ConnectionState],
//! folds inbound telemetry into the shared [`TelemetryCache`] and pushes
//! commands out one at a time.
//!
//! # Modules
//!
//! - [`session`] – [`LinkSession`]: the link state machine, command path and
//!   subscriptions.
//! - [`cache`] – [`TelemetryCache`]: newest snapshot per link, guarded by
//!   timestamp.
//! - [`throttle`] – [`CommandThrottle`]: dead zone and rate limit for
//!   continuous motion input.
//! - [`heartbeat`] – [`HeartbeatMonitor`]: liveness window of a link.
//! - [`reporter`] – [`ActivityReporter`]: queues activity-log records for
//!   an in-order background worker so logging never blocks a robot
//!   operation.

pub mod cache;
pub mod heartbeat;
pub mod reporter;
pub mod session;
pub mod throttle;

pub use cache::{CacheUpdate, TelemetryCache};
pub use heartbeat::{HeartbeatMonitor, Liveness};
pub use reporter::ActivityReporter;
pub use session::{Dispatch, LinkSession, SessionEvent, Subscription};
pub use throttle::{CommandThrottle, ThrottleConfig, apply_dead_zone};
