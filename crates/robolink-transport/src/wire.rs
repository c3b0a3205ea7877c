//! JSON codec shared by the HTTP and socket transports.
//!
//! Robot controllers speak loosely-typed JSON. Outbound bodies are flat
//! maps of axis or field name to value; inbound status payloads may carry
//! any subset of their fields, so decoding is tolerant and only a payload
//! that is not JSON at all is a [`TransportError::Protocol`].

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use robolink_types::{
    Ack, Command, CommandKind, Frame, Mode, Motion, StatusPatch, SubsystemStatus, TransportError,
};
use serde_json::{Map, Value, json};

use crate::profile::Routes;

/// Socket event name used for every outbound command.
pub const CONTROL_EVENT: &str = "control_command";
/// Socket event carrying a base64-encoded video frame.
pub const FRAME_EVENT: &str = "frame";
/// Socket event carrying a partial status report.
pub const STATUS_EVENT: &str = "status_update";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// A `POST` the HTTP transport should perform for one command.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub path: String,
    pub body: Option<Value>,
}

/// Map a command onto the controller's HTTP routes.
pub fn http_request(routes: &Routes, command: &Command) -> HttpRequest {
    let (path, body) = match &command.kind {
        CommandKind::Move(Motion::Velocity { x, y, yaw }) => (
            routes.control.clone(),
            Some(json!({ "x": x, "y": y, "yaw": yaw })),
        ),
        CommandKind::Move(Motion::Pose { x, y, z, r }) => (
            routes.control.clone(),
            Some(json!({ "x": x, "y": y, "z": z, "r": r })),
        ),
        CommandKind::Move(Motion::Joint { joint, angle, speed }) => (
            routes.joint.clone(),
            Some(json!({ "joint": joint, "angle": angle, "speed": speed })),
        ),
        CommandKind::SetMode(mode) => (routes.mode.clone(), Some(mode_body(mode))),
        CommandKind::ToggleActuator { name, on } => match routes.actuators.get(name) {
            Some(route) => {
                let path = if *on { &route.on } else { &route.off };
                (path.clone(), None)
            }
            None => (
                routes.actuator.clone(),
                Some(json!({ "name": name, "state": on })),
            ),
        },
        CommandKind::Speak { text } => (routes.say.clone(), Some(json!({ "text": text }))),
        CommandKind::PresetAction { name } => {
            (routes.action.clone(), Some(json!({ "action": name })))
        }
        CommandKind::Home => (routes.home.clone(), None),
    };
    HttpRequest { path, body }
}

fn mode_body(mode: &Mode) -> Value {
    match mode {
        Mode::ToggleStance => json!({ "mode": "toggle_stance" }),
        Mode::Gait(gait) => json!({ "mode": "gait", "gait_type": gait }),
        Mode::Named(name) => json!({ "mode": name }),
    }
}

/// Decode the `{ "message": string }` body of a command response.
pub fn decode_ack(body: &[u8]) -> Result<Ack, TransportError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| TransportError::Protocol(format!("ack is not JSON: {e}")))?;
    match value.get("message").and_then(Value::as_str) {
        Some(message) => Ok(Ack {
            message: message.to_string(),
        }),
        None => Err(TransportError::Protocol(
            "ack is missing the \"message\" field".to_string(),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Socket
// ─────────────────────────────────────────────────────────────────────────────

/// Payload of the `control_command` event for one command.
pub fn control_payload(command: &Command) -> Value {
    match &command.kind {
        CommandKind::Move(Motion::Velocity { x, y, yaw }) => json!({
            "command": "move",
            "x_speed": x,
            "y_speed": y,
            "yaw_speed": yaw,
        }),
        CommandKind::Move(Motion::Pose { x, y, z, r }) => json!({
            "command": "move_pose", "x": x, "y": y, "z": z, "r": r,
        }),
        CommandKind::Move(Motion::Joint { joint, angle, speed }) => json!({
            "command": "move_joint", "joint": joint, "angle": angle, "speed": speed,
        }),
        CommandKind::SetMode(Mode::ToggleStance) => json!({ "command": "toggle_stance" }),
        CommandKind::SetMode(Mode::Gait(gait)) => {
            json!({ "command": "switch_gait", "gait_type": gait })
        }
        CommandKind::SetMode(Mode::Named(name)) => json!({ "command": "set_mode", "mode": name }),
        CommandKind::ToggleActuator { name, on } => {
            json!({ "command": "toggle", "name": name, "state": on })
        }
        CommandKind::Speak { text } => json!({ "command": "say", "text": text }),
        CommandKind::PresetAction { name } => json!({ "command": "perform_action", "action": name }),
        CommandKind::Home => json!({ "command": "home" }),
    }
}

/// Wrap `data` in the `{ "event": .., "data": .. }` socket envelope.
pub fn envelope(event: &str, data: Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

/// A decoded inbound socket message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Frame(Frame),
    Status(StatusPatch),
    /// Well-formed but of no interest to the link (e.g. a server log line).
    Ignored(String),
}

/// Decode one inbound socket text message received at `received_at`.
pub fn decode_inbound(text: &str, received_at: DateTime<Utc>) -> Result<Inbound, TransportError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| TransportError::Protocol(format!("socket message is not JSON: {e}")))?;
    let event = value
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| TransportError::Protocol("socket message has no event name".to_string()))?;
    let data = value.get("data").cloned().unwrap_or(Value::Null);

    match event {
        FRAME_EVENT => decode_frame(&data, received_at).map(Inbound::Frame),
        STATUS_EVENT => Ok(Inbound::Status(decode_status(&data, received_at))),
        other => Ok(Inbound::Ignored(other.to_string())),
    }
}

fn decode_frame(data: &Value, received_at: DateTime<Utc>) -> Result<Frame, TransportError> {
    let encoded = data
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| TransportError::Protocol("frame event without image data".to_string()))?;
    // Some servers send a full data URL instead of bare base64.
    let encoded = match encoded.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => encoded,
    };
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| TransportError::Protocol(format!("frame is not valid base64: {e}")))?;
    Ok(Frame {
        captured_at: timestamp_field(data).unwrap_or(received_at),
        data: Bytes::from(bytes),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Decode a status payload, keeping whatever fields are present.
///
/// * `battery` – number, clamped to 0–100.
/// * `system` – object of subsystem → status, or a single status string.
/// * `timestamp` – epoch milliseconds or RFC 3339; defaults to `received_at`.
/// * any other number or boolean, top level or one object deep, becomes a
///   sensor value (`temperature.motor`).
pub fn decode_status(data: &Value, received_at: DateTime<Utc>) -> StatusPatch {
    let mut patch = StatusPatch::new(timestamp_field(data).unwrap_or(received_at));
    let Some(fields) = data.as_object() else {
        return patch;
    };

    for (key, value) in fields {
        match key.as_str() {
            "timestamp" => {}
            "battery" => {
                if let Some(level) = value.as_f64() {
                    patch.battery = Some(level.round().clamp(0.0, 100.0) as u8);
                }
            }
            "system" => decode_system(value, &mut patch),
            _ => collect_sensor(key, value, &mut patch.sensors),
        }
    }
    patch
}

fn decode_system(value: &Value, patch: &mut StatusPatch) {
    match value {
        Value::Object(entries) => {
            for (name, status) in entries {
                patch.system.insert(name.clone(), subsystem_status(status));
            }
        }
        Value::Null => {}
        other => {
            patch.system.insert("system".to_string(), subsystem_status(other));
        }
    }
}

fn subsystem_status(value: &Value) -> SubsystemStatus {
    let ok = match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(
            s.to_ascii_lowercase().as_str(),
            "ok" | "online" | "nominal" | "ready"
        ),
        _ => false,
    };
    if ok {
        SubsystemStatus::Ok
    } else {
        SubsystemStatus::Error
    }
}

fn collect_sensor(key: &str, value: &Value, sensors: &mut std::collections::BTreeMap<String, f64>) {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_f64() {
                sensors.insert(key.to_string(), v);
            }
        }
        Value::Bool(b) => {
            sensors.insert(key.to_string(), if *b { 1.0 } else { 0.0 });
        }
        Value::Object(nested) => {
            for (inner, v) in nested {
                match v {
                    Value::Number(n) => {
                        if let Some(v) = n.as_f64() {
                            sensors.insert(format!("{key}.{inner}"), v);
                        }
                    }
                    Value::Bool(b) => {
                        sensors.insert(format!("{key}.{inner}"), if *b { 1.0 } else { 0.0 });
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn timestamp_field(data: &Value) -> Option<DateTime<Utc>> {
    match data.get("timestamp")? {
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

/// Flat field map describing a command, for activity records.
pub fn command_fields(command: &Command) -> Map<String, Value> {
    let mut fields = match control_payload(command) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    fields.remove("command");
    fields
}
