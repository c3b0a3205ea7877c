//! `robolink-types` – shared vocabulary of the operator console.
//!
//! Every other crate in the workspace speaks in these types: which robot a
//! link talks to, what state the link is in, what the robot reported back
//! ([`TelemetrySnapshot`]), what the operator asked for ([`Command`]) and
//! what goes into the audit trail ([`ActivityRecord`]).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Robots and link state
// ─────────────────────────────────────────────────────────────────────────────

/// Robot families the console knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotId {
    /// Pepper humanoid (HTTP).
    Pepper,
    /// Quadruped (persistent socket).
    Dog,
    /// Desktop robotic arm (HTTP).
    Arm,
    /// Magnetic climbing robot (HTTP).
    Spider,
    /// Tele-driven vehicle (persistent socket).
    Vehicle,
}

impl RobotId {
    pub const ALL: [RobotId; 5] = [
        RobotId::Pepper,
        RobotId::Dog,
        RobotId::Arm,
        RobotId::Spider,
        RobotId::Vehicle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RobotId::Pepper => "pepper",
            RobotId::Dog => "dog",
            RobotId::Arm => "arm",
            RobotId::Spider => "spider",
            RobotId::Vehicle => "vehicle",
        }
    }
}

impl fmt::Display for RobotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RobotId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RobotId::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown robot '{s}'"))
    }
}

/// Coarse health of a link as shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The channel is open but telemetry has gone stale or the last
    /// exchange failed. Commands are still attempted.
    Degraded,
}

impl ConnectionState {
    /// Whether commands may be handed to the transport in this state.
    pub fn accepts_commands(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }

    /// Whether the UI should show reduced confidence for commands.
    pub fn is_uncertain(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry
// ─────────────────────────────────────────────────────────────────────────────

/// Health of one robot subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsystemStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

/// One encoded video frame. The payload is opaque (usually JPEG) and is
/// shared by reference count, never mutated in place.
#[derive(Clone, PartialEq)]
pub struct Frame {
    pub captured_at: DateTime<Utc>,
    pub data: Bytes,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("captured_at", &self.captured_at)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Immutable robot state bundle.
///
/// A new snapshot is produced for every accepted inbound event; the previous
/// one is never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,
    /// Battery charge in percent (0–100), when the robot reports one.
    pub battery: Option<u8>,
    pub system_status: BTreeMap<String, SubsystemStatus>,
    pub sensor_values: BTreeMap<String, f64>,
    #[serde(skip)]
    pub frame: Option<Frame>,
}

impl TelemetrySnapshot {
    /// A snapshot carrying nothing but a timestamp.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            battery: None,
            system_status: BTreeMap::new(),
            sensor_values: BTreeMap::new(),
            frame: None,
        }
    }

    /// `true` when no reported subsystem is in [`SubsystemStatus::Error`].
    pub fn all_systems_ok(&self) -> bool {
        self.system_status
            .values()
            .all(|s| *s == SubsystemStatus::Ok)
    }

    /// Build the successor of `base` that carries `frame` and is stamped with
    /// the frame's capture time.
    pub fn with_frame(base: Option<&TelemetrySnapshot>, frame: Frame) -> Self {
        let mut next = base
            .cloned()
            .unwrap_or_else(|| TelemetrySnapshot::empty(frame.captured_at));
        next.timestamp = frame.captured_at;
        next.frame = Some(frame);
        next
    }
}

/// Partial status report. Any subset of fields may be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPatch {
    pub timestamp: DateTime<Utc>,
    pub battery: Option<u8>,
    #[serde(default)]
    pub system: BTreeMap<String, SubsystemStatus>,
    #[serde(default)]
    pub sensors: BTreeMap<String, f64>,
}

impl StatusPatch {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            battery: None,
            system: BTreeMap::new(),
            sensors: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.battery.is_none() && self.system.is_empty() && self.sensors.is_empty()
    }

    /// Merge this patch over `base`, producing the next snapshot.
    ///
    /// Fields absent from the patch keep their previous value; the frame is
    /// carried over untouched.
    pub fn apply_to(&self, base: Option<&TelemetrySnapshot>) -> TelemetrySnapshot {
        let mut next = base
            .cloned()
            .unwrap_or_else(|| TelemetrySnapshot::empty(self.timestamp));
        next.timestamp = self.timestamp;
        if let Some(battery) = self.battery {
            next.battery = Some(battery.min(100));
        }
        for (name, status) in &self.system {
            next.system_status.insert(name.clone(), *status);
        }
        for (name, value) in &self.sensors {
            next.sensor_values.insert(name.clone(), *value);
        }
        next
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Motion request. The robot-side controller owns the actual kinematics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "motion", rename_all = "snake_case")]
pub enum Motion {
    /// Body velocity for legged and wheeled bases, each axis in `[-1, 1]`.
    Velocity { x: f64, y: f64, yaw: f64 },
    /// Cartesian end-effector target or increment for the arm.
    Pose { x: f64, y: f64, z: f64, r: f64 },
    /// Single joint to an absolute angle.
    Joint { joint: String, angle: f64, speed: f64 },
}

impl Motion {
    /// Zero velocity / zero increment. A joint target is never a stop.
    pub fn is_stop(&self) -> bool {
        match self {
            Motion::Velocity { x, y, yaw } => *x == 0.0 && *y == 0.0 && *yaw == 0.0,
            Motion::Pose { x, y, z, r } => *x == 0.0 && *y == 0.0 && *z == 0.0 && *r == 0.0,
            Motion::Joint { .. } => false,
        }
    }
}

/// Operating mode switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum Mode {
    /// Sit / stand toggle on the quadruped.
    ToggleStance,
    /// Gait index understood by the robot (0 = normal, 1 = agile, 2 = stable).
    Gait(u8),
    /// Any other named mode (e.g. `climb`, `manual`).
    Named(String),
}

/// What the operator asked the robot to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum CommandKind {
    Move(Motion),
    SetMode(Mode),
    /// Binary actuator such as the climbing robot's electromagnet or
    /// Pepper's audio stream.
    ToggleActuator { name: String, on: bool },
    Speak { text: String },
    PresetAction { name: String },
    Home,
}

impl CommandKind {
    /// Short label used in logs and activity records.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Move(_) => "move",
            CommandKind::SetMode(_) => "set_mode",
            CommandKind::ToggleActuator { .. } => "toggle_actuator",
            CommandKind::Speak { .. } => "speak",
            CommandKind::PresetAction { .. } => "preset_action",
            CommandKind::Home => "home",
        }
    }
}

/// A discrete, fire-and-forget instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Client-side id used to match an HTTP response to its request.
    pub correlation_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub kind: CommandKind,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            issued_at: Utc::now(),
            kind,
        }
    }
}

/// Acknowledgement body returned by HTTP controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Activity log
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier assigned by the activity store.
pub type LogId = Uuid;

/// Category of an audit-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Login,
    Logout,
    RobotAccess,
    RobotControl,
    PermissionChange,
    RoleChange,
    Error,
    System,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Login => "login",
            ActivityType::Logout => "logout",
            ActivityType::RobotAccess => "robot_access",
            ActivityType::RobotControl => "robot_control",
            ActivityType::PermissionChange => "permission_change",
            ActivityType::RoleChange => "role_change",
            ActivityType::Error => "error",
            ActivityType::System => "system",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(ActivityType::Login),
            "logout" => Ok(ActivityType::Logout),
            "robot_access" => Ok(ActivityType::RobotAccess),
            "robot_control" => Ok(ActivityType::RobotControl),
            "permission_change" => Ok(ActivityType::PermissionChange),
            "role_change" => Ok(ActivityType::RoleChange),
            "error" => Ok(ActivityType::Error),
            "system" => Ok(ActivityType::System),
            other => Err(format!("unknown activity type '{other}'")),
        }
    }
}

/// Severity of an audit-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// One audit-log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: LogId,
    pub user_id: String,
    pub activity_type: ActivityType,
    pub detail: serde_json::Value,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl ActivityRecord {
    /// New record with a fresh id, stamped now.
    pub fn new(
        user_id: impl Into<String>,
        activity_type: ActivityType,
        detail: serde_json::Value,
        severity: Severity,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            activity_type,
            detail,
            severity,
            timestamp: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure reported by a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportError {
    /// Connect, poll or request failed at the network layer (refused, DNS,
    /// timeout).
    #[error("robot unreachable: {0}")]
    Unreachable(String),

    /// A response arrived but could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport closed")]
    Closed,
}

/// Failure returned to the caller of a link operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The link is disconnected; the command was rejected locally.
    #[error("link is not connected")]
    NotConnected,

    /// The link was closed while the operation was in flight.
    #[error("link closed")]
    Closed,

    /// The command was handed to the transport and was not delivered.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failure of the activity log collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("log delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("log storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).expect("valid timestamp")
    }

    #[test]
    fn robot_id_parses_case_insensitively() {
        assert_eq!("Pepper".parse::<RobotId>(), Ok(RobotId::Pepper));
        assert_eq!(" dog ".parse::<RobotId>(), Ok(RobotId::Dog));
        assert!("toaster".parse::<RobotId>().is_err());
        assert_eq!(RobotId::Vehicle.to_string(), "vehicle");
    }

    #[test]
    fn only_disconnected_rejects_commands() {
        assert!(!ConnectionState::Disconnected.accepts_commands());
        assert!(ConnectionState::Connecting.accepts_commands());
        assert!(ConnectionState::Connected.accepts_commands());
        assert!(ConnectionState::Degraded.accepts_commands());
        assert!(ConnectionState::Degraded.is_uncertain());
        assert!(!ConnectionState::Connected.is_uncertain());
    }

    #[test]
    fn patch_merges_over_previous_snapshot() {
        let mut first = StatusPatch::new(ts(100));
        first.battery = Some(80);
        first.system.insert("motors".into(), SubsystemStatus::Ok);
        let base = first.apply_to(None);

        let mut second = StatusPatch::new(ts(200));
        second.sensors.insert("stability".into(), 0.9);
        let next = second.apply_to(Some(&base));

        assert_eq!(next.timestamp, ts(200));
        assert_eq!(next.battery, Some(80), "absent field keeps previous value");
        assert_eq!(next.system_status.get("motors"), Some(&SubsystemStatus::Ok));
        assert_eq!(next.sensor_values.get("stability"), Some(&0.9));
        // The base is untouched.
        assert!(base.sensor_values.is_empty());
    }

    #[test]
    fn patch_clamps_battery() {
        let mut patch = StatusPatch::new(ts(1));
        patch.battery = Some(140);
        assert_eq!(patch.apply_to(None).battery, Some(100));
    }

    #[test]
    fn frame_successor_keeps_status_fields() {
        let mut patch = StatusPatch::new(ts(100));
        patch.battery = Some(55);
        let base = patch.apply_to(None);
        let frame = Frame {
            captured_at: ts(150),
            data: Bytes::from_static(b"\xff\xd8jpeg"),
        };
        let next = TelemetrySnapshot::with_frame(Some(&base), frame.clone());
        assert_eq!(next.timestamp, ts(150));
        assert_eq!(next.battery, Some(55));
        assert_eq!(next.frame, Some(frame));
    }

    #[test]
    fn error_subsystem_is_not_all_ok() {
        let mut snap = TelemetrySnapshot::empty(ts(1));
        assert!(snap.all_systems_ok());
        snap.system_status.insert("camera".into(), SubsystemStatus::Error);
        assert!(!snap.all_systems_ok());
    }

    #[test]
    fn stop_detection() {
        assert!(Motion::Velocity { x: 0.0, y: 0.0, yaw: 0.0 }.is_stop());
        assert!(!Motion::Velocity { x: 0.1, y: 0.0, yaw: 0.0 }.is_stop());
        assert!(Motion::Pose { x: 0.0, y: 0.0, z: 0.0, r: 0.0 }.is_stop());
        assert!(
            !Motion::Joint { joint: "HeadYaw".into(), angle: 0.0, speed: 0.2 }.is_stop()
        );
    }

    #[test]
    fn command_kind_serializes_with_action_tag() {
        let kind = CommandKind::Speak { text: "hola".into() };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["action"], "speak");
        assert_eq!(json["payload"]["text"], "hola");
    }

    #[test]
    fn subsystem_status_uses_upper_case_on_the_wire() {
        let json = serde_json::to_string(&SubsystemStatus::Error).unwrap();
        assert_eq!(json, "\"ERROR\"");
    }

    #[test]
    fn activity_type_string_forms_agree() {
        for t in [
            ActivityType::Login,
            ActivityType::RobotAccess,
            ActivityType::RobotControl,
            ActivityType::RoleChange,
            ActivityType::Error,
        ] {
            let json = serde_json::to_value(t).unwrap();
            assert_eq!(json, t.as_str());
            assert_eq!(t.as_str().parse::<ActivityType>(), Ok(t));
        }
    }

    #[test]
    fn link_error_wraps_transport_error() {
        let err: LinkError = TransportError::Unreachable("timed out".into()).into();
        assert!(err.to_string().contains("timed out"));
    }
}
