//! Persistent bidirectional socket transport.
//!
//! Used by the legged and wheeled robots. Both directions carry JSON
//! envelopes `{ "event": name, "data": payload }`:
//!
//! * console → robot: `control_command`, fire-and-forget;
//! * robot → console: `frame` (base64 image) and `status_update`.
//!
//! When the socket drops, a supervisor task redials with a bounded,
//! fixed-delay policy ([`ReconnectPolicy`]). Commands issued while the
//! socket is down fail immediately with [`TransportError::Unreachable`];
//! nothing is buffered for later replay.
//!
//! Dialing goes through the [`Dialer`] trait so the link logic can be driven
//! by an in-memory pair in tests; [`WsDialer`] is the real WebSocket client.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::ready;
use futures_util::stream::BoxStream;
use futures_util::{Sink, SinkExt, StreamExt};
use robolink_types::{Command, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::profile::{ReconnectPolicy, RobotProfile};
use crate::transport::{Delivery, EventSink, Transport, TransportEvent, TransportKind};
use crate::wire::{self, Inbound};

/// Outbound half of a dialed socket, carrying text messages.
pub type BoxSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
/// Inbound half of a dialed socket. Ends (or yields an error) when the
/// connection is lost.
pub type BoxMessageStream = BoxStream<'static, Result<String, TransportError>>;

type Outbound = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

/// Opens one socket connection.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<(BoxSink, BoxMessageStream), TransportError>;
}

/// WebSocket client built on `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &str) -> Result<(BoxSink, BoxMessageStream), TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Unreachable(format!("websocket dial {url}: {e}")))?;
        let (write, read) = ws.split();

        let sink = write
            .sink_map_err(|e| TransportError::Unreachable(e.to_string()))
            .with(|text: String| ready(Ok::<_, TransportError>(Message::Text(text.into()))));

        let stream = read.filter_map(|message| {
            ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Unreachable(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), stream.boxed()))
    }
}

/// Transport for robots that keep a socket open.
pub struct SocketTransport {
    url: String,
    policy: ReconnectPolicy,
    dial_timeout: Duration,
    dialer: Arc<dyn Dialer>,
    outbound: Outbound,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SocketTransport {
    /// WebSocket transport for `profile`.
    pub fn new(profile: &RobotProfile) -> Self {
        Self::with_dialer(
            profile.base_url.clone(),
            profile.reconnect,
            profile.request_timeout(),
            Arc::new(WsDialer),
        )
    }

    pub fn with_dialer(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        dial_timeout: Duration,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            url: url.into(),
            policy,
            dial_timeout,
            dialer,
            outbound: Arc::new(Mutex::new(None)),
            supervisor: Mutex::new(None),
        }
    }

    fn stop(&self) {
        if let Some(handle) = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        clear_outbound(&self.outbound);
    }
}

fn install_outbound(outbound: &Outbound) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    *outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    rx
}

fn clear_outbound(outbound: &Outbound) {
    outbound.lock().unwrap_or_else(PoisonError::into_inner).take();
}

/// Dial `url` up to `policy.max_attempts` times, pausing `policy.delay()`
/// between attempts. When `events` is given, each attempt is announced as
/// [`TransportEvent::Reconnecting`].
async fn dial_with_retry(
    dialer: &dyn Dialer,
    url: &str,
    policy: ReconnectPolicy,
    dial_timeout: Duration,
    events: Option<&EventSink>,
) -> Result<(BoxSink, BoxMessageStream), TransportError> {
    let attempts = policy.max_attempts.max(1);
    let mut last = TransportError::Unreachable(format!("no dial attempted for {url}"));
    for attempt in 1..=attempts {
        if let Some(events) = events {
            let _ = events.send(TransportEvent::Reconnecting { attempt });
        }
        match tokio::time::timeout(dial_timeout, dialer.dial(url)).await {
            Ok(Ok(link)) => return Ok(link),
            Ok(Err(e)) => last = e,
            Err(_) => {
                last = TransportError::Unreachable(format!(
                    "dial timed out after {} ms",
                    dial_timeout.as_millis()
                ))
            }
        }
        debug!(url = %url, attempt, error = %last, "dial attempt failed");
        if attempt < attempts {
            tokio::time::sleep(policy.delay()).await;
        }
    }
    Err(last)
}

/// Move messages in both directions until the link breaks; returns why.
async fn pump(
    sink: &mut BoxSink,
    stream: &mut BoxMessageStream,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    events: &EventSink,
) -> TransportError {
    loop {
        tokio::select! {
            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(text).await {
                    return e;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(text)) => match wire::decode_inbound(&text, Utc::now()) {
                    Ok(Inbound::Frame(frame)) => {
                        let _ = events.send(TransportEvent::Frame(frame));
                    }
                    Ok(Inbound::Status(patch)) => {
                        let _ = events.send(TransportEvent::Status(patch));
                    }
                    Ok(Inbound::Ignored(event)) => debug!(event = %event, "ignoring socket event"),
                    Err(e) => {
                        warn!(error = %e, "undecodable socket message");
                        let _ = events.send(TransportEvent::Error(e));
                    }
                },
                Some(Err(e)) => return e,
                None => return TransportError::Closed,
            },
        }
    }
}

struct Supervisor {
    url: String,
    policy: ReconnectPolicy,
    dial_timeout: Duration,
    dialer: Arc<dyn Dialer>,
    outbound: Outbound,
    events: EventSink,
}

impl Supervisor {
    async fn run(
        self,
        mut sink: BoxSink,
        mut stream: BoxMessageStream,
        mut rx: mpsc::UnboundedReceiver<String>,
    ) {
        loop {
            let reason = pump(&mut sink, &mut stream, &mut rx, &self.events).await;
            clear_outbound(&self.outbound);
            if self.events.is_closed() {
                return;
            }
            warn!(url = %self.url, reason = %reason, "socket lost, reconnecting");
            let _ = self.events.send(TransportEvent::Error(reason));

            match dial_with_retry(
                self.dialer.as_ref(),
                &self.url,
                self.policy,
                self.dial_timeout,
                Some(&self.events),
            )
            .await
            {
                Ok((new_sink, new_stream)) => {
                    sink = new_sink;
                    stream = new_stream;
                    rx = install_outbound(&self.outbound);
                    info!(url = %self.url, "socket re-established");
                    let _ = self.events.send(TransportEvent::Connected);
                }
                Err(e) => {
                    warn!(
                        url = %self.url,
                        attempts = self.policy.max_attempts,
                        error = %e,
                        "giving up on socket"
                    );
                    let _ = self.events.send(TransportEvent::Closed);
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn connect(&self, events: EventSink) -> Result<(), TransportError> {
        self.stop();
        let (sink, stream) = dial_with_retry(
            self.dialer.as_ref(),
            &self.url,
            self.policy,
            self.dial_timeout,
            None,
        )
        .await?;

        let rx = install_outbound(&self.outbound);
        info!(url = %self.url, "socket established");
        let _ = events.send(TransportEvent::Connected);

        let supervisor = Supervisor {
            url: self.url.clone(),
            policy: self.policy,
            dial_timeout: self.dial_timeout,
            dialer: Arc::clone(&self.dialer),
            outbound: Arc::clone(&self.outbound),
            events,
        };
        let handle = tokio::spawn(supervisor.run(sink, stream, rx));
        *self.supervisor.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    async fn send(&self, command: &Command) -> Result<Delivery, TransportError> {
        let message = wire::envelope(wire::CONTROL_EVENT, wire::control_payload(command));
        let guard = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard
            .as_ref()
            .ok_or_else(|| TransportError::Unreachable("socket not connected".to_string()))?;
        tx.send(message)
            .map_err(|_| TransportError::Unreachable("socket not connected".to_string()))?;
        debug!(correlation_id = %command.correlation_id, "control command queued");
        Ok(Delivery::Dispatched)
    }

    async fn close(&self) {
        self.stop();
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{EventStream, event_channel};
    use robolink_types::{CommandKind, Motion};
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    // ── In-memory socket pair ───────────────────────────────────────────────

    /// The robot's end of an in-memory link.
    struct RobotEnd {
        to_console: mpsc::UnboundedSender<Result<String, TransportError>>,
        from_console: mpsc::UnboundedReceiver<String>,
    }

    impl RobotEnd {
        fn emit(&self, event: &str, data: Value) {
            self.to_console
                .send(Ok(wire::envelope(event, data)))
                .expect("console end alive");
        }
    }

    fn memory_link() -> ((BoxSink, BoxMessageStream), RobotEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<String, TransportError>>();

        let sink = futures_util::sink::unfold(out_tx, |tx, text: String| async move {
            tx.send(text).map_err(|_| TransportError::Closed)?;
            Ok::<_, TransportError>(tx)
        });
        let stream = futures_util::stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        (
            (Box::pin(sink), stream.boxed()),
            RobotEnd {
                to_console: in_tx,
                from_console: out_rx,
            },
        )
    }

    /// Hands out pre-built links in order, then fails.
    #[derive(Default)]
    struct ScriptedDialer {
        links: Mutex<VecDeque<(BoxSink, BoxMessageStream)>>,
        attempts: AtomicU32,
    }

    impl ScriptedDialer {
        fn with_links(n: usize) -> (Arc<Self>, Vec<RobotEnd>) {
            let dialer = Arc::new(Self::default());
            let mut ends = Vec::new();
            for _ in 0..n {
                let (link, end) = memory_link();
                dialer.links.lock().unwrap().push_back(link);
                ends.push(end);
            }
            (dialer, ends)
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        async fn dial(&self, url: &str) -> Result<(BoxSink, BoxMessageStream), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.links
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| TransportError::Unreachable(format!("{url} refused")))
        }
    }

    fn transport(dialer: Arc<ScriptedDialer>) -> SocketTransport {
        SocketTransport::with_dialer(
            "ws://dog.test/ws",
            ReconnectPolicy::default(),
            Duration::from_secs(5),
            dialer,
        )
    }

    async fn next_event(rx: &mut EventStream) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("event within timeout")
            .expect("event channel open")
    }

    fn walk() -> Command {
        Command::new(CommandKind::Move(Motion::Velocity {
            x: 0.5,
            y: 0.0,
            yaw: 0.0,
        }))
    }

    // ── Tests ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn initial_dial_gives_up_after_five_attempts() {
        let dialer = Arc::new(ScriptedDialer::default());
        let transport = transport(Arc::clone(&dialer));
        let (tx, _rx) = event_channel();

        let started = tokio::time::Instant::now();
        let err = transport.connect(tx).await.unwrap_err();

        assert!(matches!(err, TransportError::Unreachable(_)));
        assert_eq!(dialer.attempts(), 5);
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5),
            "four one-second pauses between five attempts, got {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn send_before_connect_is_rejected() {
        let (dialer, _ends) = ScriptedDialer::with_links(1);
        let transport = transport(dialer);
        let err = transport.send(&walk()).await.unwrap_err();
        assert_eq!(err, TransportError::Unreachable("socket not connected".into()));
    }

    #[tokio::test]
    async fn commands_go_out_as_control_events() {
        let (dialer, mut ends) = ScriptedDialer::with_links(1);
        let transport = transport(dialer);
        let (tx, mut rx) = event_channel();
        transport.connect(tx).await.unwrap();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);

        assert_eq!(transport.send(&walk()).await.unwrap(), Delivery::Dispatched);

        let sent = ends[0].from_console.recv().await.unwrap();
        let v: Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(v["event"], "control_command");
        assert_eq!(v["data"]["command"], "move");
        assert_eq!(v["data"]["x_speed"], 0.5);
        transport.close().await;
    }

    #[tokio::test]
    async fn inbound_status_and_frames_become_events() {
        let (dialer, ends) = ScriptedDialer::with_links(1);
        let transport = transport(dialer);
        let (tx, mut rx) = event_channel();
        transport.connect(tx).await.unwrap();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);

        ends[0].emit("status_update", json!({ "battery": 71, "system": "ok" }));
        ends[0].emit("frame", json!({ "data": "/9j/AA==" }));
        ends[0].emit("log", json!("booted"));
        ends[0].to_console.send(Ok("not json".into())).unwrap();

        match next_event(&mut rx).await {
            TransportEvent::Status(p) => assert_eq!(p.battery, Some(71)),
            other => panic!("expected status, got {other:?}"),
        }
        match next_event(&mut rx).await {
            TransportEvent::Frame(f) => assert_eq!(&f.data[..], &[0xff, 0xd8, 0xff, 0x00]),
            other => panic!("expected frame, got {other:?}"),
        }
        assert!(matches!(
            next_event(&mut rx).await,
            TransportEvent::Error(TransportError::Protocol(_))
        ));
        transport.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_socket_is_redialed() {
        let (dialer, mut ends) = ScriptedDialer::with_links(2);
        let transport = transport(Arc::clone(&dialer));
        let (tx, mut rx) = event_channel();
        transport.connect(tx).await.unwrap();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);

        let mut second = ends.pop().unwrap();
        drop(ends);

        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Error(TransportError::Closed)
        );
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Reconnecting { attempt: 1 }
        );
        assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);
        assert_eq!(dialer.attempts(), 2);

        transport.send(&walk()).await.unwrap();
        assert!(second.from_console.recv().await.is_some());
        transport.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_exhaustion_closes_the_transport() {
        let (dialer, ends) = ScriptedDialer::with_links(1);
        let transport = transport(Arc::clone(&dialer));
        let (tx, mut rx) = event_channel();
        transport.connect(tx).await.unwrap();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);

        drop(ends);
        assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Reconnecting { attempt: 1 }
        );

        // Nothing is buffered while the socket is down.
        assert!(matches!(
            transport.send(&walk()).await,
            Err(TransportError::Unreachable(_))
        ));

        for attempt in 2..=5 {
            assert_eq!(
                next_event(&mut rx).await,
                TransportEvent::Reconnecting { attempt }
            );
        }
        assert_eq!(next_event(&mut rx).await, TransportEvent::Closed);
        assert_eq!(dialer.attempts(), 6, "one initial dial plus five redials");
    }

    #[tokio::test]
    async fn websocket_dialer_talks_to_a_real_server() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let update = wire::envelope("status_update", json!({ "battery": 42 }));
            ws.send(Message::Text(update.into())).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    return text.as_str().to_owned();
                }
            }
            String::new()
        });

        let transport = SocketTransport::with_dialer(
            format!("ws://{addr}/ws"),
            ReconnectPolicy::default(),
            Duration::from_secs(5),
            Arc::new(WsDialer),
        );
        let (tx, mut rx) = event_channel();
        transport.connect(tx).await.unwrap();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);
        match next_event(&mut rx).await {
            TransportEvent::Status(p) => assert_eq!(p.battery, Some(42)),
            other => panic!("expected status, got {other:?}"),
        }

        transport
            .send(&Command::new(CommandKind::Home))
            .await
            .unwrap();
        let received = server.await.unwrap();
        let v: Value = serde_json::from_str(&received).unwrap();
        assert_eq!(v["data"]["command"], "home");
        transport.close().await;
    }
}
