//! Operator configuration, stored in `~/.robolink/config.toml`.
//!
//! ```toml
//! user_id = "ana"
//! activity_db = "/home/ana/.robolink/activity.db"
//! throttle_ms = 50
//! dead_zone = 0.15
//!
//! [robots.lab-dog]
//! robot = "dog"
//! base_url = "ws://10.0.0.12:5000/ws"
//! transport = "socket"
//! ```
//!
//! Every `[robots.<name>]` table is a full `RobotProfile`; a name without a
//! table falls back to the family defaults when it is a known robot id.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use robolink_session::ThrottleConfig;
use robolink_transport::{RobotProfile, TransportKind};
use robolink_types::RobotId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no profile named '{0}' and it is not a known robot")]
    UnknownRobot(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Operator id written into every activity record.
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// SQLite file holding the local activity log and the retry queue.
    #[serde(default = "default_activity_db")]
    pub activity_db: String,

    /// Remote collector URL. When set, records are POSTed there and queued
    /// locally on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_endpoint: Option<String>,

    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    #[serde(default = "default_dead_zone")]
    pub dead_zone: f64,

    /// Local activity records older than this are purged at startup.
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub robots: BTreeMap<String, RobotProfile>,
}

fn default_user_id() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "operator".to_string())
}
fn default_activity_db() -> String {
    robolink_dir().join("activity.db").to_string_lossy().into_owned()
}
fn default_throttle_ms() -> u64 {
    50
}
fn default_dead_zone() -> f64 {
    0.15
}
fn default_log_retention_days() -> u32 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            activity_db: default_activity_db(),
            activity_endpoint: None,
            throttle_ms: default_throttle_ms(),
            dead_zone: default_dead_zone(),
            log_retention_days: default_log_retention_days(),
            robots: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            interval: Duration::from_millis(self.throttle_ms),
            dead_zone: self.dead_zone,
        }
    }

    /// Profile for `name`: the `[robots.<name>]` table if present, otherwise
    /// the defaults of the robot family called `name`. With `sim` the
    /// transport is swapped for the in-process simulator.
    pub fn profile_for(&self, name: &str, sim: bool) -> Result<RobotProfile, ConfigError> {
        let mut profile = match self.robots.get(name) {
            Some(p) => p.clone(),
            None => {
                let robot: RobotId = name
                    .parse()
                    .map_err(|_| ConfigError::UnknownRobot(name.to_string()))?;
                RobotProfile::for_robot(robot, RobotProfile::default_base_url(robot))
            }
        };
        if sim {
            profile.transport = TransportKind::Loopback;
            profile.telemetry_interval_ms = 1_000;
        }
        Ok(profile)
    }

    /// Every robot the console can reach by name, configured tables first.
    pub fn robot_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.robots.keys().cloned().collect();
        for robot in RobotId::ALL {
            if !self.robots.contains_key(robot.as_str()) {
                names.push(robot.as_str().to_string());
            }
        }
        names
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn robolink_dir() -> PathBuf {
    PathBuf::from(home_dir()).join(".robolink")
}

/// `~/.robolink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".robolink").join("config.toml")
}

/// Load the config file with environment overrides applied. `None` when no
/// config file exists yet.
pub fn load() -> Result<Option<Config>, ConfigError> {
    let mut cfg = read_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// The file at `path` exactly as written.
pub(crate) fn read_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(toml::from_str(&raw)?))
}

/// Apply `ROBOLINK_*` overrides. Unparseable values are ignored.
///
/// | Variable | Field |
/// |---|---|
/// | `ROBOLINK_USER_ID` | `user_id` |
/// | `ROBOLINK_ACTIVITY_DB` | `activity_db` |
/// | `ROBOLINK_ACTIVITY_ENDPOINT` | `activity_endpoint` |
/// | `ROBOLINK_THROTTLE_MS` | `throttle_ms` |
/// | `ROBOLINK_DEAD_ZONE` | `dead_zone` (must be in `[0, 1)`) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ROBOLINK_USER_ID")
        && !v.trim().is_empty()
    {
        cfg.user_id = v;
    }
    if let Ok(v) = std::env::var("ROBOLINK_ACTIVITY_DB") {
        cfg.activity_db = v;
    }
    if let Ok(v) = std::env::var("ROBOLINK_ACTIVITY_ENDPOINT") {
        cfg.activity_endpoint = (!v.trim().is_empty()).then_some(v);
    }
    if let Ok(v) = std::env::var("ROBOLINK_THROTTLE_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.throttle_ms = ms;
    }
    if let Ok(v) = std::env::var("ROBOLINK_DEAD_ZONE")
        && let Ok(dz) = v.parse::<f64>()
        && (0.0..1.0).contains(&dz)
    {
        cfg.dead_zone = dz;
    }
}

pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
    }
    let raw = toml::to_string_pretty(cfg)?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        (dir, path)
    }

    #[cfg(unix)]
    #[test]
    fn config_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, path) = temp_config_path();
        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_keeps_robot_tables() {
        let (_dir, path) = temp_config_path();
        let mut cfg = Config {
            user_id: "ana".into(),
            activity_endpoint: Some("https://logs.example/activity".into()),
            ..Config::default()
        };
        let mut dog = RobotProfile::for_robot(RobotId::Dog, "ws://10.0.0.12:5000/ws");
        dog.reconnect.max_attempts = 3;
        cfg.robots.insert("lab-dog".into(), dog.clone());
        save_to(&cfg, &path).expect("save");

        let loaded = read_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.user_id, "ana");
        assert_eq!(loaded.throttle_ms, 50);
        assert_eq!(
            loaded.activity_endpoint.as_deref(),
            Some("https://logs.example/activity")
        );
        assert_eq!(loaded.robots.get("lab-dog"), Some(&dog));
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let (_dir, path) = temp_config_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "user_id = \"kim\"\n").unwrap();

        let cfg = read_from(&path).unwrap().unwrap();
        assert_eq!(cfg.user_id, "kim");
        assert_eq!(cfg.dead_zone, 0.15);
        assert_eq!(cfg.log_retention_days, 30);
        assert!(cfg.robots.is_empty());
        assert!(cfg.activity_endpoint.is_none());
    }

    #[test]
    fn broken_file_is_a_parse_error() {
        let (_dir, path) = temp_config_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "throttle_ms = \"fast\"\n").unwrap();
        assert!(matches!(read_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_loads_none() {
        let (_dir, path) = temp_config_path();
        assert!(read_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_robolink_dir() {
        let p = config_path_for_home("/home/ana");
        assert_eq!(p, PathBuf::from("/home/ana/.robolink/config.toml"));
    }

    #[test]
    fn profile_for_prefers_configured_table() {
        let mut cfg = Config::default();
        let custom = RobotProfile::for_robot(RobotId::Arm, "http://arm.lab:9000");
        cfg.robots.insert("arm".into(), custom.clone());

        assert_eq!(cfg.profile_for("arm", false).unwrap(), custom);
        let spider = cfg.profile_for("spider", false).unwrap();
        assert_eq!(spider.base_url, RobotProfile::default_base_url(RobotId::Spider));
        assert!(matches!(
            cfg.profile_for("toaster", false),
            Err(ConfigError::UnknownRobot(_))
        ));
    }

    #[test]
    fn sim_profile_uses_loopback() {
        let p = Config::default().profile_for("dog", true).unwrap();
        assert_eq!(p.transport, TransportKind::Loopback);
        assert_eq!(p.robot, RobotId::Dog);
    }

    #[test]
    fn robot_names_list_tables_then_families() {
        let mut cfg = Config::default();
        cfg.robots.insert(
            "lab-dog".into(),
            RobotProfile::for_robot(RobotId::Dog, "ws://10.0.0.12:5000/ws"),
        );
        let names = cfg.robot_names();
        assert_eq!(names[0], "lab-dog");
        assert_eq!(names.len(), 1 + RobotId::ALL.len());
    }

    #[test]
    fn throttle_settings_follow_config() {
        let cfg = Config {
            throttle_ms: 80,
            dead_zone: 0.2,
            ..Config::default()
        };
        let t = cfg.throttle();
        assert_eq!(t.interval, Duration::from_millis(80));
        assert_eq!(t.dead_zone, 0.2);
    }

    #[test]
    fn env_overrides_user_id() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ROBOLINK_USER_ID", "night-shift") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.user_id, "night-shift");
        unsafe { std::env::remove_var("ROBOLINK_USER_ID") };
    }

    #[test]
    fn env_overrides_activity_db() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ROBOLINK_ACTIVITY_DB", "/var/lib/robolink/log.db") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.activity_db, "/var/lib/robolink/log.db");
        unsafe { std::env::remove_var("ROBOLINK_ACTIVITY_DB") };
    }

    #[test]
    fn env_overrides_throttle_and_ignores_garbage() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ROBOLINK_THROTTLE_MS", "100") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.throttle_ms, 100);

        unsafe { std::env::set_var("ROBOLINK_THROTTLE_MS", "soon") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.throttle_ms, 50);
        unsafe { std::env::remove_var("ROBOLINK_THROTTLE_MS") };
    }

    #[test]
    fn env_dead_zone_must_be_a_fraction() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ROBOLINK_DEAD_ZONE", "1.5") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.dead_zone, 0.15);

        unsafe { std::env::set_var("ROBOLINK_DEAD_ZONE", "0.3") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.dead_zone, 0.3);
        unsafe { std::env::remove_var("ROBOLINK_DEAD_ZONE") };
    }
}
