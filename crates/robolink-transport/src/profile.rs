//! Per-robot connection profiles.
//!
//! Robot families differ only in where they listen, which paths they expose
//! and how often they report. All of that is data: a [`RobotProfile`] can be
//! built from the defaults with [`RobotProfile::for_robot`] or deserialised
//! from a `[robots.<name>]` table in the console's config file.

use std::collections::BTreeMap;
use std::time::Duration;

use robolink_types::RobotId;
use serde::{Deserialize, Serialize};

use crate::transport::TransportKind;

/// Fixed-delay, bounded reconnection policy for the socket transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Total dial attempts per (re-)connection, including the first.
    pub max_attempts: u32,
    /// Pause between two attempts, in milliseconds.
    pub delay_ms: u64,
}

impl ReconnectPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 1000,
        }
    }
}

/// On/off endpoints of a binary actuator that has dedicated paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorRoute {
    pub on: String,
    pub off: String,
}

/// HTTP paths of a robot controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Routes {
    /// Liveness / status check (`GET`).
    pub status: String,
    /// Velocity and pose commands (`POST`).
    pub control: String,
    pub joint: String,
    pub mode: String,
    pub say: String,
    pub action: String,
    pub home: String,
    /// Generic actuator toggle, used when `actuators` has no entry.
    pub actuator: String,
    pub video: String,
    /// Actuators with their own on/off endpoints, keyed by actuator name.
    pub actuators: BTreeMap<String, ActuatorRoute>,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            status: "/status".to_string(),
            control: "/control".to_string(),
            joint: "/move_joint".to_string(),
            mode: "/mode".to_string(),
            say: "/say".to_string(),
            action: "/perform_action".to_string(),
            home: "/home".to_string(),
            actuator: "/actuator".to_string(),
            video: "/video_feed".to_string(),
            actuators: BTreeMap::new(),
        }
    }
}

/// Everything needed to open a link to one robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotProfile {
    pub robot: RobotId,
    /// `http://host:port` for HTTP robots, `ws://host:port/path` for socket
    /// robots.
    pub base_url: String,
    pub transport: TransportKind,
    #[serde(default)]
    pub routes: Routes,
    /// Status poll period (HTTP only).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on any single request or dial.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How often the robot is expected to report. The link degrades after
    /// two missed reports.
    #[serde(default = "default_poll_interval_ms")]
    pub telemetry_interval_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

impl RobotProfile {
    /// Default profile of a robot family listening at `base_url`.
    pub fn for_robot(robot: RobotId, base_url: impl Into<String>) -> Self {
        let mut routes = Routes::default();
        let (transport, telemetry_interval_ms) = match robot {
            RobotId::Pepper => {
                routes.status = "/".to_string();
                routes.actuators.insert(
                    "audio".to_string(),
                    ActuatorRoute {
                        on: "/start_audio".to_string(),
                        off: "/stop_audio".to_string(),
                    },
                );
                (TransportKind::HttpPoll, default_poll_interval_ms())
            }
            RobotId::Arm | RobotId::Spider => (TransportKind::HttpPoll, default_poll_interval_ms()),
            RobotId::Dog | RobotId::Vehicle => (TransportKind::Socket, 1_000),
        };
        Self {
            robot,
            base_url: base_url.into(),
            transport,
            routes,
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            telemetry_interval_ms,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Default address of each robot family on the lab network.
    pub fn default_base_url(robot: RobotId) -> &'static str {
        match robot {
            RobotId::Pepper => "http://127.0.0.1:8070",
            RobotId::Arm => "http://127.0.0.1:8079",
            RobotId::Spider => "http://127.0.0.1:8081",
            RobotId::Dog => "ws://127.0.0.1:5000/ws",
            RobotId::Vehicle => "ws://127.0.0.1:5001/ws",
        }
    }

    /// Absolute URL of `path` on this robot.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// URL of the MJPEG video feed. The stream itself is rendered by the
    /// UI and never parsed here.
    pub fn video_url(&self) -> String {
        self.url(&self.routes.video)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    /// Window after which a silent link is considered stale: two missed
    /// reports. A polled robot reports no faster than it is polled.
    pub fn heartbeat_window(&self) -> Duration {
        let expected = match self.transport {
            TransportKind::HttpPoll => self.telemetry_interval().max(self.poll_interval()),
            TransportKind::Socket | TransportKind::Loopback => self.telemetry_interval(),
        };
        expected * 2
    }
}
