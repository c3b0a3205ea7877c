//! In-memory transport.
//!
//! Records every command it is given and lets the caller push
//! [`TransportEvent`]s as if a robot had sent them. With
//! [`LoopbackTransport::with_simulated_telemetry`] it also acts as a small
//! robot simulator, reporting a slowly draining battery, which is what the
//! console uses for `transport = "loopback"` robots.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use robolink_types::{Ack, Command, StatusPatch, SubsystemStatus, TransportError};
use tokio::task::JoinHandle;

use crate::transport::{Delivery, EventSink, Transport, TransportEvent, TransportKind};

#[derive(Default)]
struct State {
    events: Option<EventSink>,
    sent: Vec<Command>,
    connect_calls: u32,
    fail_connect: Option<TransportError>,
    fail_send: Option<TransportError>,
    ticker: Option<JoinHandle<()>>,
}

/// Transport that never touches the network.
#[derive(Default)]
pub struct LoopbackTransport {
    state: Mutex<State>,
    simulate: Option<Duration>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A loopback that reports a status patch every `interval` once
    /// connected.
    pub fn with_simulated_telemetry(interval: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            simulate: Some(interval),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `connect` fail with `error`.
    pub fn fail_connect_with(&self, error: TransportError) {
        self.state().fail_connect = Some(error);
    }

    /// Make every `send` fail with `error` (or succeed again with `None`).
    pub fn fail_sends_with(&self, error: Option<TransportError>) {
        self.state().fail_send = error;
    }

    /// Commands accepted so far, oldest first.
    pub fn sent(&self) -> Vec<Command> {
        self.state().sent.clone()
    }

    /// Number of `send` calls that reached the transport, failed ones
    /// included.
    pub fn send_count(&self) -> usize {
        self.state().sent.len()
    }

    pub fn connect_calls(&self) -> u32 {
        self.state().connect_calls
    }

    /// Deliver `event` as if the robot had produced it. Returns `false`
    /// when no link is listening.
    pub fn inject(&self, event: TransportEvent) -> bool {
        match &self.state().events {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    fn stop_ticker(state: &mut State) {
        if let Some(handle) = state.ticker.take() {
            handle.abort();
        }
    }
}

/// Battery reading of the simulator after `tick` reports.
fn simulated_battery(tick: u64) -> u8 {
    100u64.saturating_sub(tick / 10).max(5) as u8
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Loopback
    }

    async fn connect(&self, events: EventSink) -> Result<(), TransportError> {
        let mut state = self.state();
        state.connect_calls += 1;
        if let Some(error) = state.fail_connect.take() {
            return Err(error);
        }
        Self::stop_ticker(&mut state);
        let _ = events.send(TransportEvent::Connected);

        if let Some(interval) = self.simulate {
            let sink = events.clone();
            state.ticker = Some(tokio::spawn(async move {
                let mut tick = 0u64;
                loop {
                    tokio::time::sleep(interval).await;
                    let mut patch = StatusPatch::new(Utc::now());
                    patch.battery = Some(simulated_battery(tick));
                    patch.system.insert("drive".to_string(), SubsystemStatus::Ok);
                    if sink.send(TransportEvent::Status(patch)).is_err() {
                        break;
                    }
                    tick += 1;
                }
            }));
        }
        state.events = Some(events);
        Ok(())
    }

    async fn send(&self, command: &Command) -> Result<Delivery, TransportError> {
        let mut state = self.state();
        state.sent.push(command.clone());
        if let Some(error) = state.fail_send.clone() {
            return Err(error);
        }
        Ok(Delivery::Acked(Ack {
            message: "ok".to_string(),
        }))
    }

    async fn close(&self) {
        let mut state = self.state();
        Self::stop_ticker(&mut state);
        state.events = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::event_channel;
    use robolink_types::CommandKind;

    #[tokio::test]
    async fn records_commands_and_acks() {
        let lb = LoopbackTransport::new();
        let cmd = Command::new(CommandKind::Home);
        let delivery = lb.send(&cmd).await.unwrap();
        assert!(matches!(delivery, Delivery::Acked(_)));
        assert_eq!(lb.sent(), vec![cmd]);
    }

    #[tokio::test]
    async fn scripted_failures() {
        let lb = LoopbackTransport::new();
        lb.fail_connect_with(TransportError::Unreachable("refused".into()));
        let (tx, _rx) = event_channel();
        assert!(lb.connect(tx.clone()).await.is_err());
        assert!(lb.connect(tx).await.is_ok(), "connect failure is one-shot");
        assert_eq!(lb.connect_calls(), 2);

        lb.fail_sends_with(Some(TransportError::Closed));
        assert_eq!(
            lb.send(&Command::new(CommandKind::Home)).await,
            Err(TransportError::Closed)
        );
        assert_eq!(lb.send_count(), 1);
    }

    #[tokio::test]
    async fn inject_reaches_the_connected_listener_only() {
        let lb = LoopbackTransport::new();
        assert!(!lb.inject(TransportEvent::Closed));

        let (tx, mut rx) = event_channel();
        lb.connect(tx).await.unwrap();
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        assert!(lb.inject(TransportEvent::Closed));
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));

        lb.close().await;
        assert!(!lb.inject(TransportEvent::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn simulator_reports_battery() {
        let lb = LoopbackTransport::with_simulated_telemetry(Duration::from_secs(1));
        let (tx, mut rx) = event_channel();
        lb.connect(tx).await.unwrap();
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        match rx.recv().await {
            Some(TransportEvent::Status(p)) => {
                assert_eq!(p.battery, Some(100));
                assert_eq!(p.system["drive"], SubsystemStatus::Ok);
            }
            other => panic!("expected status, got {other:?}"),
        }
        lb.close().await;
    }

    #[test]
    fn simulated_battery_drains_to_a_floor() {
        assert_eq!(simulated_battery(0), 100);
        assert_eq!(simulated_battery(25), 98);
        assert_eq!(simulated_battery(10_000), 5);
    }
}
