//! [`LinkSession`] – one operator's live link to one robot.
//!
//! # State machine
//!
//! ```text
//!                 open()            connect ok
//! Disconnected ─────────► Connecting ─────────► Connected ◄──┐
//!      ▲                      │                    │         │ snapshot, frame,
//!      │      connect failed  │      stale, send / │         │ heartbeat
//!      ├──────────────────────┘      poll failure  ▼         │
//!      │                                        Degraded ────┘
//!      └──── close(), transport Closed ◄───────────┘
//! ```
//!
//! All link state sits behind one [`std::sync::Mutex`] that is never held
//! across an `.await`; each inbound [`TransportEvent`] is applied to
//! completion under it. Commands are serialized by a separate
//! [`tokio::sync::Mutex`] held across the transport `send`.
//!
//! Every `open()` starts a new *epoch*. Background tasks and in-flight
//! calls remember the epoch they started in, and anything that completes
//! after `close()` bumped it is dropped instead of applied.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use robolink_activity::ActivityRecorder;
use robolink_transport::{
    Delivery, EventStream, RobotProfile, Transport, TransportEvent, event_channel,
};
use robolink_types::{
    Ack, Command, CommandKind, ConnectionState, LinkError, RobotId, Severity, TelemetrySnapshot,
    TransportError,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheUpdate, TelemetryCache};
use crate::heartbeat::{HeartbeatMonitor, Liveness};
use crate::reporter::ActivityReporter;

const EVENT_CAPACITY: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// What a [`Subscription`] observes.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A newer snapshot was accepted into the cache.
    Snapshot(Arc<TelemetrySnapshot>),
}

/// Result of a command handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub correlation_id: Uuid,
    /// The link was Degraded when the command went out; the UI should show
    /// reduced confidence.
    pub degraded: bool,
    /// Controller answer, for request/response transports.
    pub ack: Option<Ack>,
}

/// Observer of one session. Ends once the session is closed.
pub struct Subscription {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl Subscription {
    /// Next event, or `None` once the session has been closed. Events a slow
    /// subscriber missed are skipped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered event, without waiting.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

struct Inner {
    state: ConnectionState,
    epoch: u64,
    monitor: HeartbeatMonitor,
    last_snapshot_at: Option<Instant>,
    last_command_sent_at: Option<DateTime<Utc>>,
    notifier: Option<broadcast::Sender<SessionEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owner of one robot link.
///
/// Always handled through an `Arc`: background tasks keep a weak reference
/// back to the session.
pub struct LinkSession {
    link_id: Uuid,
    robot: RobotId,
    transport: Arc<dyn Transport>,
    cache: Arc<TelemetryCache>,
    reporter: ActivityReporter,
    inner: Mutex<Inner>,
    send_lock: tokio::sync::Mutex<()>,
}

impl LinkSession {
    /// New, disconnected session for `robot` over `transport`. The link is
    /// considered stale after `heartbeat_window` without inbound traffic.
    pub fn new(
        robot: RobotId,
        transport: Arc<dyn Transport>,
        cache: Arc<TelemetryCache>,
        reporter: ActivityReporter,
        heartbeat_window: Duration,
    ) -> Arc<Self> {
        let (notifier, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            link_id: Uuid::new_v4(),
            robot,
            transport,
            cache,
            reporter,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                epoch: 0,
                monitor: HeartbeatMonitor::new(heartbeat_window),
                last_snapshot_at: None,
                last_command_sent_at: None,
                notifier: Some(notifier),
                tasks: Vec::new(),
            }),
            send_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Session for the robot described by `profile`, reporting activity as
    /// `user_id`.
    pub fn from_profile(
        profile: &RobotProfile,
        cache: Arc<TelemetryCache>,
        recorder: Option<Arc<dyn ActivityRecorder>>,
        user_id: &str,
    ) -> Result<Arc<Self>, TransportError> {
        let transport = robolink_transport::build(profile)?;
        let reporter = match recorder {
            Some(recorder) => ActivityReporter::new(recorder, user_id, profile.robot),
            None => ActivityReporter::disabled(profile.robot),
        };
        Ok(Self::new(
            profile.robot,
            transport,
            cache,
            reporter,
            profile.heartbeat_window(),
        ))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn link_id(&self) -> Uuid {
        self.link_id
    }

    pub fn robot(&self) -> RobotId {
        self.robot
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn current_snapshot(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.cache.read(self.link_id)
    }

    /// Time since the last accepted snapshot or frame.
    pub fn since_last_snapshot(&self) -> Option<Duration> {
        self.lock()
            .last_snapshot_at
            .map(|at| Instant::now().saturating_duration_since(at))
    }

    pub fn last_command_sent_at(&self) -> Option<DateTime<Utc>> {
        self.lock().last_command_sent_at
    }

    /// Snapshots dropped because a newer one was already cached.
    pub fn stale_dropped(&self) -> u64 {
        self.cache.stale_dropped(self.link_id)
    }

    pub fn subscribe(&self) -> Subscription {
        let receiver = match &self.lock().notifier {
            Some(notifier) => notifier.subscribe(),
            None => {
                let (closed, receiver) = broadcast::channel(1);
                drop(closed);
                receiver
            }
        };
        Subscription { receiver }
    }

    // ── State transitions ───────────────────────────────────────────────────

    /// Move to `to`, notifying subscribers and the activity log. No-op if
    /// already there.
    fn transition(&self, inner: &mut Inner, to: ConnectionState, reason: &str) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        info!(robot = %self.robot, link = %self.link_id, from = %from, to = %to, reason, "link state changed");
        if let Some(notifier) = &inner.notifier {
            let _ = notifier.send(SessionEvent::StateChanged { from, to });
        }
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                self.reporter.access("connected", None, Severity::Info)
            }
            (_, ConnectionState::Degraded) => {
                self.reporter.access("degraded", Some(reason), Severity::Warning)
            }
            (ConnectionState::Connected | ConnectionState::Degraded, ConnectionState::Disconnected) => {
                self.reporter.access(reason, None, Severity::Warning)
            }
            _ => {}
        }
    }

    /// Something the robot sent proves the link alive.
    fn mark_alive(&self, inner: &mut Inner, now: Instant) {
        inner.monitor.beat(now);
        if inner.state == ConnectionState::Degraded {
            self.transition(inner, ConnectionState::Connected, "telemetry resumed");
        }
    }

    fn degrade(&self, inner: &mut Inner, reason: &str) {
        if inner.state == ConnectionState::Connected {
            self.transition(inner, ConnectionState::Degraded, reason);
        }
    }

    fn store_snapshot(&self, inner: &mut Inner, snapshot: TelemetrySnapshot, now: Instant) {
        let snapshot = Arc::new(snapshot);
        match self.cache.update(self.link_id, Arc::clone(&snapshot)) {
            CacheUpdate::Accepted => {
                inner.last_snapshot_at = Some(now);
                if let Some(notifier) = &inner.notifier {
                    let _ = notifier.send(SessionEvent::Snapshot(snapshot));
                }
                self.mark_alive(inner, now);
            }
            CacheUpdate::Stale => {
                debug!(
                    link = %self.link_id,
                    timestamp = %snapshot.timestamp,
                    "stale snapshot dropped"
                );
            }
        }
    }

    /// Apply one transport event. Returns `false` once the event stream of
    /// this epoch should stop being read.
    fn apply(&self, epoch: u64, event: TransportEvent) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch || inner.state == ConnectionState::Disconnected {
            return false;
        }
        let now = Instant::now();
        match event {
            TransportEvent::Connected => {
                self.mark_alive(&mut inner, now);
                self.reporter.flush();
            }
            TransportEvent::Heartbeat { at } => {
                debug!(link = %self.link_id, at = %at, "heartbeat");
                self.mark_alive(&mut inner, now);
            }
            TransportEvent::Status(patch) => {
                let base = self.cache.read(self.link_id);
                let next = patch.apply_to(base.as_deref());
                self.store_snapshot(&mut inner, next, now);
            }
            TransportEvent::Frame(frame) => {
                let base = self.cache.read(self.link_id);
                let next = TelemetrySnapshot::with_frame(base.as_deref(), frame);
                self.store_snapshot(&mut inner, next, now);
            }
            TransportEvent::Error(error) => {
                warn!(robot = %self.robot, link = %self.link_id, error = %error, "transport error");
                self.reporter.transport_error(&error);
                self.degrade(&mut inner, &error.to_string());
            }
            TransportEvent::Reconnecting { attempt } => {
                info!(robot = %self.robot, attempt, "transport reconnecting");
                self.degrade(&mut inner, "reconnecting");
            }
            TransportEvent::Closed => {
                inner.monitor.reset();
                self.transition(&mut inner, ConnectionState::Disconnected, "lost");
                return false;
            }
        }
        true
    }

    /// Periodic staleness check. Returns `false` once the epoch is over.
    fn check_heartbeat(&self, epoch: u64) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch || inner.state == ConnectionState::Disconnected {
            return false;
        }
        if inner.state == ConnectionState::Connected
            && inner.monitor.health(Instant::now()) == Liveness::Stale
        {
            self.transition(&mut inner, ConnectionState::Degraded, "heartbeat stale");
        }
        true
    }

    // ── Operations ──────────────────────────────────────────────────────────

    /// Connect the transport.
    ///
    /// Moves Disconnected → Connecting → Connected, or back to Disconnected
    /// with the transport error. Opening a link that is not Disconnected is
    /// a no-op.
    pub async fn open(self: &Arc<Self>) -> Result<(), LinkError> {
        let epoch = {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Disconnected {
                return Ok(());
            }
            inner.epoch += 1;
            if inner.notifier.is_none() {
                inner.notifier = Some(broadcast::channel(EVENT_CAPACITY).0);
            }
            self.transition(&mut inner, ConnectionState::Connecting, "open");
            inner.epoch
        };

        let (events, stream) = event_channel();
        let result = self.transport.connect(events).await;

        let outcome = {
            let mut inner = self.lock();
            (inner.epoch == epoch).then(|| self.finish_open(&mut inner, epoch, result, stream))
        };
        match outcome {
            Some(outcome) => outcome,
            None => {
                // Closed while connecting; undo whatever the transport started.
                self.transport.close().await;
                Err(LinkError::Closed)
            }
        }
    }

    fn finish_open(
        self: &Arc<Self>,
        inner: &mut Inner,
        epoch: u64,
        result: Result<(), TransportError>,
        stream: EventStream,
    ) -> Result<(), LinkError> {
        match result {
            Ok(()) => {
                inner.monitor.beat(Instant::now());
                self.transition(inner, ConnectionState::Connected, "transport connected");
                let pump = tokio::spawn(pump(Arc::downgrade(self), epoch, stream));
                let ticker = tokio::spawn(heartbeat_ticker(
                    Arc::downgrade(self),
                    epoch,
                    inner.monitor.check_period(),
                ));
                inner.tasks.extend([pump, ticker]);
                self.reporter.flush();
                Ok(())
            }
            Err(error) => {
                warn!(robot = %self.robot, error = %error, "connect failed");
                self.transition(inner, ConnectionState::Disconnected, "connect failed");
                self.reporter.transport_error(&error);
                Err(LinkError::Transport(error))
            }
        }
    }

    /// Send one command.
    ///
    /// Fails with [`LinkError::NotConnected`] on a Disconnected link without
    /// touching the transport. Commands on one link go out one at a time, in
    /// call order. A failed send degrades the link and is returned as
    /// [`LinkError::Transport`]; it is never retried.
    pub async fn issue_command(&self, kind: CommandKind) -> Result<Dispatch, LinkError> {
        if !self.state().accepts_commands() {
            return Err(LinkError::NotConnected);
        }
        let _turn = self.send_lock.lock().await;

        let (epoch, degraded) = {
            let inner = self.lock();
            if !inner.state.accepts_commands() {
                return Err(LinkError::NotConnected);
            }
            (inner.epoch, inner.state == ConnectionState::Degraded)
        };

        let command = Command::new(kind);
        debug!(
            robot = %self.robot,
            action = command.kind.name(),
            correlation_id = %command.correlation_id,
            "issuing command"
        );
        let result = self.transport.send(&command).await;

        let mut inner = self.lock();
        if inner.epoch != epoch {
            return Err(LinkError::Closed);
        }
        match result {
            Ok(delivery) => {
                inner.last_command_sent_at = Some(command.issued_at);
                self.reporter.command(&command, degraded);
                let ack = match delivery {
                    Delivery::Acked(ack) => {
                        self.mark_alive(&mut inner, Instant::now());
                        self.reporter.flush();
                        Some(ack)
                    }
                    Delivery::Dispatched => None,
                };
                Ok(Dispatch {
                    correlation_id: command.correlation_id,
                    degraded,
                    ack,
                })
            }
            Err(error) => {
                warn!(
                    robot = %self.robot,
                    action = command.kind.name(),
                    error = %error,
                    "command not delivered"
                );
                self.reporter.transport_error(&error);
                self.degrade(&mut inner, &error.to_string());
                Err(LinkError::Transport(error))
            }
        }
    }

    /// Tear the link down: stop background tasks, close the transport,
    /// evict the cached telemetry and end every subscription.
    pub async fn close(&self) {
        let tasks = {
            let mut inner = self.lock();
            inner.epoch += 1;
            inner.monitor.reset();
            inner.last_snapshot_at = None;
            self.transition(&mut inner, ConnectionState::Disconnected, "closed");
            inner.notifier = None;
            std::mem::take(&mut inner.tasks)
        };
        for task in tasks {
            task.abort();
        }
        self.transport.close().await;
        self.cache.evict(self.link_id);
        info!(robot = %self.robot, link = %self.link_id, "link closed");
    }
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        for task in self.lock().tasks.drain(..) {
            task.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Background tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn pump(session: Weak<LinkSession>, epoch: u64, mut events: EventStream) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        if !session.apply(epoch, event) {
            break;
        }
    }
}

async fn heartbeat_ticker(session: Weak<LinkSession>, epoch: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(session) = session.upgrade() else {
            break;
        };
        if !session.check_heartbeat(epoch) {
            break;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
