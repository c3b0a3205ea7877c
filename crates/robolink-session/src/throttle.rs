//! [`CommandThrottle`] – rate limiter for continuous motion input.
//!
//! Joysticks and held keys produce a sample every few milliseconds; the robot
//! only needs a fresh velocity every `interval`. The throttle sits between the
//! input device and [`LinkSession::issue_command`][crate::LinkSession::issue_command]:
//!
//! * axes whose magnitude is below `dead_zone` are zeroed;
//! * a non-zero motion is emitted at most once per `interval` per group;
//! * the first stop (all axes zero) after motion is emitted immediately, and
//!   repeated stops are swallowed.
//!
//! Time is always supplied by the caller.

use std::collections::HashMap;
use std::time::Duration;

use robolink_types::Motion;
use tokio::time::Instant;

/// Throttle tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleConfig {
    pub interval: Duration,
    pub dead_zone: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            dead_zone: 0.15,
        }
    }
}

#[derive(Default)]
struct GroupState {
    last_emit: Option<Instant>,
    moving: bool,
}

/// Per-axis-group motion throttle.
///
/// # Example
///
/// ```
/// use robolink_session::{CommandThrottle, ThrottleConfig};
/// use robolink_types::Motion;
/// use tokio::time::Instant;
///
/// let mut throttle = CommandThrottle::new(ThrottleConfig::default());
/// let now = Instant::now();
/// let go = Motion::Velocity { x: 0.8, y: 0.0, yaw: 0.0 };
///
/// assert!(throttle.sample("base", go.clone(), now).is_some());
/// assert!(throttle.sample("base", go, now).is_none());
/// ```
pub struct CommandThrottle {
    config: ThrottleConfig,
    groups: HashMap<String, GroupState>,
}

impl CommandThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            groups: HashMap::new(),
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    /// Feed one input sample for `group` taken at `now`. Returns the motion
    /// to send, if any.
    pub fn sample(&mut self, group: &str, motion: Motion, now: Instant) -> Option<Motion> {
        let motion = apply_dead_zone(motion, self.config.dead_zone);
        let interval = self.config.interval;
        let state = self.groups.entry(group.to_string()).or_default();

        if motion.is_stop() {
            if !state.moving {
                return None;
            }
            state.moving = false;
            state.last_emit = Some(now);
            return Some(motion);
        }

        let due = state
            .last_emit
            .is_none_or(|last| now.saturating_duration_since(last) >= interval);
        if !due {
            return None;
        }
        state.last_emit = Some(now);
        state.moving = true;
        Some(motion)
    }

    /// Forget the history of `group`, e.g. when the input device is unplugged.
    pub fn reset(&mut self, group: &str) {
        self.groups.remove(group);
    }
}

/// Zero every axis whose magnitude is below `dead_zone`. Joint targets are
/// absolute and pass through untouched.
pub fn apply_dead_zone(motion: Motion, dead_zone: f64) -> Motion {
    let dz = |v: f64| if v.abs() < dead_zone { 0.0 } else { v };
    match motion {
        Motion::Velocity { x, y, yaw } => Motion::Velocity {
            x: dz(x),
            y: dz(y),
            yaw: dz(yaw),
        },
        Motion::Pose { x, y, z, r } => Motion::Pose {
            x: dz(x),
            y: dz(y),
            z: dz(z),
            r: dz(r),
        },
        joint @ Motion::Joint { .. } => joint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vel(x: f64, y: f64, yaw: f64) -> Motion {
        Motion::Velocity { x, y, yaw }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn constant_input_is_limited_to_one_per_interval() {
        let mut t = CommandThrottle::new(ThrottleConfig::default());
        let start = Instant::now();
        let window = 500;

        let emitted = (0..window / 10)
            .filter_map(|i| t.sample("base", vel(0.6, 0.0, 0.0), start + ms(i * 10)))
            .count();

        let bound = (window / 50 + 1) as usize;
        assert!(emitted <= bound, "{emitted} emissions exceed {bound}");
        assert_eq!(emitted, 10);
    }

    #[test]
    fn stop_is_immediate_and_not_repeated() {
        let mut t = CommandThrottle::new(ThrottleConfig::default());
        let start = Instant::now();

        assert!(t.sample("base", vel(0.6, 0.0, 0.0), start).is_some());
        // 10 ms later: inside the interval, but a stop still goes out.
        assert_eq!(
            t.sample("base", vel(0.0, 0.0, 0.0), start + ms(10)),
            Some(vel(0.0, 0.0, 0.0))
        );
        assert!(t.sample("base", vel(0.0, 0.0, 0.0), start + ms(20)).is_none());
        assert!(t.sample("base", vel(0.0, 0.0, 0.0), start + ms(200)).is_none());
    }

    #[test]
    fn stop_without_prior_motion_is_swallowed() {
        let mut t = CommandThrottle::new(ThrottleConfig::default());
        assert!(t.sample("base", vel(0.0, 0.0, 0.0), Instant::now()).is_none());
    }

    #[test]
    fn dead_zone_turns_drift_into_a_stop() {
        let mut t = CommandThrottle::new(ThrottleConfig::default());
        let start = Instant::now();
        assert!(t.sample("base", vel(0.5, 0.0, 0.0), start).is_some());
        assert_eq!(
            t.sample("base", vel(0.1, -0.05, 0.14), start + ms(5)),
            Some(vel(0.0, 0.0, 0.0))
        );
    }

    #[test]
    fn dead_zone_keeps_strong_axes() {
        assert_eq!(
            apply_dead_zone(vel(0.1, 0.9, -0.2), 0.15),
            vel(0.0, 0.9, -0.2)
        );
        let joint = Motion::Joint {
            joint: "HeadYaw".into(),
            angle: 0.05,
            speed: 0.1,
        };
        assert_eq!(apply_dead_zone(joint.clone(), 0.15), joint);
    }

    #[test]
    fn groups_are_throttled_independently() {
        let mut t = CommandThrottle::new(ThrottleConfig::default());
        let now = Instant::now();
        assert!(t.sample("left_stick", vel(0.5, 0.0, 0.0), now).is_some());
        assert!(t.sample("right_stick", vel(0.0, 0.0, 0.7), now).is_some());
        assert!(t.sample("left_stick", vel(0.5, 0.0, 0.0), now + ms(10)).is_none());
    }

    #[test]
    fn reset_forgets_the_group() {
        let mut t = CommandThrottle::new(ThrottleConfig::default());
        let now = Instant::now();
        t.sample("base", vel(0.5, 0.0, 0.0), now);
        t.reset("base");
        assert!(t.sample("base", vel(0.5, 0.0, 0.0), now + ms(1)).is_some());
    }
}
