//! [`HeartbeatMonitor`] – liveness tracking for one link.
//!
//! Anything the robot sends (a status poll answer, a snapshot, a frame)
//! counts as a beat. A link whose last beat is older than its window is
//! *stale*; the session maps that to [`ConnectionState::Degraded`].
//!
//! [`ConnectionState::Degraded`]: robolink_types::ConnectionState::Degraded

use std::time::Duration;

use tokio::time::Instant;

/// Liveness state reported by [`HeartbeatMonitor::health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// A beat arrived within the window.
    Alive,
    /// No beat within the window, or no beat at all yet.
    Stale,
}

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    window: Duration,
    last_beat: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_beat: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a beat at `now`, resetting the deadline.
    pub fn beat(&mut self, now: Instant) {
        self.last_beat = Some(now);
    }

    /// Forget every beat, e.g. when the link is torn down.
    pub fn reset(&mut self) {
        self.last_beat = None;
    }

    pub fn health(&self, now: Instant) -> Liveness {
        match self.last_beat {
            Some(at) if now.saturating_duration_since(at) <= self.window => Liveness::Alive,
            _ => Liveness::Stale,
        }
    }

    /// Time since the last beat.
    pub fn since_last(&self, now: Instant) -> Option<Duration> {
        self.last_beat.map(|at| now.saturating_duration_since(at))
    }

    /// How often a supervisor should call [`health`][Self::health] to notice
    /// a stale link within a quarter window.
    pub fn check_period(&self) -> Duration {
        (self.window / 4).max(Duration::from_millis(10))
    }
}
