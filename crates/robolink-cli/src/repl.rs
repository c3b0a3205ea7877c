//! Interactive operator console.
//!
//! Supported slash-commands:
//!   /help                      – show this list
//!   /robots                    – list known robots and their addresses
//!   /connect <robot> [sim]     – open a link (`sim` uses the built-in simulator)
//!   /status                    – connection state and latest telemetry
//!   /move <x> <y> <yaw>        – drive the base (rate limited)
//!   /pose /joint /say /action /home /mode /gait /stance /toggle
//!                              – one-shot robot commands
//!   /logs [type] [n]           – recent activity-log entries
//!   /close                     – close the current link
//!   /quit | /exit              – stop the robot, close the link and exit

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use robolink_activity::{ActivityLog, ActivityRecorder, BestEffortRecorder, MirroredRecorder};
use robolink_session::{CommandThrottle, LinkSession, SessionEvent, Subscription, TelemetryCache};
use robolink_transport::RobotProfile;
use robolink_types::{
    ActivityRecord, ActivityType, CommandKind, ConnectionState, LinkError, Motion, Severity,
    SubsystemStatus,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::json;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::commands::{self, Input, LogQuery};
use crate::config::Config;

/// Throttle group for keyboard driving.
const KEYBOARD: &str = "keyboard";

/// Remote activity collector with its local retry queue.
pub struct Remote {
    pub endpoint: String,
    pub recorder: Arc<BestEffortRecorder>,
}

/// Where activity records go: always the local log, and the remote
/// collector as well when one is configured.
pub struct Activity {
    /// Local log; also what `/logs` reads.
    pub log: Arc<ActivityLog>,
    pub remote: Option<Remote>,
}

impl Activity {
    fn recorder(&self) -> Arc<dyn ActivityRecorder> {
        match &self.remote {
            Some(remote) => Arc::new(MirroredRecorder::new(
                Arc::clone(&self.log),
                Arc::clone(&remote.recorder) as Arc<dyn ActivityRecorder>,
            )),
            None => Arc::clone(&self.log) as Arc<dyn ActivityRecorder>,
        }
    }
}

struct Link {
    name: String,
    profile: RobotProfile,
    session: Arc<LinkSession>,
    watcher: JoinHandle<()>,
}

pub struct Console {
    runtime: Runtime,
    config: Config,
    cache: Arc<TelemetryCache>,
    activity: Activity,
    throttle: CommandThrottle,
    link: Option<Link>,
}

impl Console {
    pub fn new(runtime: Runtime, config: Config, activity: Activity) -> Self {
        let throttle = CommandThrottle::new(config.throttle());
        Self {
            runtime,
            config,
            cache: Arc::new(TelemetryCache::new()),
            activity,
            throttle,
            link: None,
        }
    }

    fn prompt(&self) -> String {
        match &self.link {
            Some(link) => format!("robolink[{}]> ", link.name),
            None => "robolink> ".to_string(),
        }
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Empty | Input::Quit => {}
            Input::Help => cmd_help(),
            Input::Robots => self.cmd_robots(),
            Input::Connect { name, sim } => self.cmd_connect(&name, sim),
            Input::Status => self.cmd_status(),
            Input::Drive(motion) => self.cmd_drive(motion),
            Input::Issue(kind) => self.issue(kind),
            Input::Logs(query) => self.cmd_logs(query),
            Input::Close => self.close_link(),
        }
    }

    // ── Links ───────────────────────────────────────────────────────────────

    fn cmd_robots(&self) {
        println!();
        for name in self.config.robot_names() {
            let connected = self.link.as_ref().is_some_and(|l| l.name == name);
            let marker = if connected { "●".green() } else { "○".dimmed() };
            match self.config.profile_for(&name, false) {
                Ok(p) => println!(
                    "  {marker} {:<12} {:<8} {}",
                    name.bold(),
                    p.robot.as_str(),
                    p.base_url.dimmed()
                ),
                Err(e) => println!("  {marker} {:<12} {}", name.bold(), e.to_string().red()),
            }
        }
        println!();
    }

    fn cmd_connect(&mut self, name: &str, sim: bool) {
        if self.link.is_some() {
            self.close_link();
        }
        let profile = match self.config.profile_for(name, sim) {
            Ok(p) => p,
            Err(e) => {
                println!("{} {e}", "Error:".red());
                return;
            }
        };
        let session = match LinkSession::from_profile(
            &profile,
            Arc::clone(&self.cache),
            Some(self.activity.recorder()),
            &self.config.user_id,
        ) {
            Ok(s) => s,
            Err(e) => {
                println!("{} {e}", "Error:".red());
                return;
            }
        };

        let target = if sim { "simulator".to_string() } else { profile.base_url.clone() };
        println!("  Connecting to {} at {} …", name.bold(), target.dimmed());
        match self.runtime.block_on(session.open()) {
            Ok(()) => {
                println!("  {} {} is {}", "✓".green().bold(), name, session.state());
                let watcher = self.runtime.spawn(watch(session.subscribe(), name.to_string()));
                self.link = Some(Link {
                    name: name.to_string(),
                    profile,
                    session,
                    watcher,
                });
            }
            Err(e) => println!("  {} could not connect to {name}: {e}", "✗".red().bold()),
        }
    }

    fn close_link(&mut self) {
        let Some(link) = self.link.take() else {
            println!("  No robot connected.");
            return;
        };
        if link.session.state().accepts_commands()
            && let Some(stop) = commands::stop_command(link.session.robot())
            && let Err(e) = self.runtime.block_on(link.session.issue_command(stop))
        {
            warn!(robot = %link.name, error = %e, "stop before close not delivered");
        }
        self.runtime.block_on(link.session.close());
        link.watcher.abort();
        self.throttle.reset(KEYBOARD);
        println!("  Link to {} closed.", link.name.bold());
    }

    fn cmd_status(&self) {
        let Some(link) = &self.link else {
            println!("  No robot connected. Use {} first.", "/connect <robot>".bold());
            return;
        };
        let session = &link.session;
        println!();
        println!(
            "  {} ({}) {}",
            link.name.bold(),
            session.robot(),
            paint_state(session.state())
        );
        match session.since_last_snapshot() {
            Some(age) => println!("  Last telemetry : {:.1}s ago", age.as_secs_f64()),
            None => println!("  Last telemetry : {}", "none yet".dimmed()),
        }
        if let Some(at) = session.last_command_sent_at() {
            println!("  Last command   : {}", at.format("%H:%M:%S%.3f"));
        }
        if let Some(snapshot) = session.current_snapshot() {
            if let Some(battery) = snapshot.battery {
                println!("  Battery        : {}", paint_battery(battery));
            }
            for (system, status) in &snapshot.system_status {
                let status = match status {
                    SubsystemStatus::Ok => "OK".green(),
                    SubsystemStatus::Error => "ERROR".red().bold(),
                };
                println!("  {:<15}: {status}", system);
            }
            for (sensor, value) in &snapshot.sensor_values {
                println!("  {:<15}: {value:.2}", sensor);
            }
            if let Some(frame) = &snapshot.frame {
                println!(
                    "  Video frame    : {} bytes at {}",
                    frame.data.len(),
                    frame.captured_at.format("%H:%M:%S%.3f")
                );
            }
        }
        let dropped = session.stale_dropped();
        if dropped > 0 {
            println!("  Stale updates  : {dropped} dropped");
        }
        println!("  Video feed     : {}", link.profile.video_url().dimmed());
        println!();
    }

    // ── Commands ────────────────────────────────────────────────────────────

    fn cmd_drive(&mut self, motion: Motion) {
        if self.link.is_none() {
            println!("  No robot connected.");
            return;
        }
        match self
            .throttle
            .sample(KEYBOARD, motion, tokio::time::Instant::now())
        {
            Some(motion) => self.issue(CommandKind::Move(motion)),
            None => println!("  {}", "(held back by the rate limiter)".dimmed()),
        }
    }

    fn issue(&self, kind: CommandKind) {
        let Some(link) = &self.link else {
            println!("  No robot connected. Use {} first.", "/connect <robot>".bold());
            return;
        };
        match self.runtime.block_on(link.session.issue_command(kind)) {
            Ok(dispatch) => {
                let reply = dispatch
                    .ack
                    .map(|ack| format!("robot says: {}", ack.message))
                    .unwrap_or_else(|| "sent".to_string());
                if dispatch.degraded {
                    println!("  {} {reply} (link degraded)", "⚠".yellow().bold());
                } else {
                    println!("  {} {reply}", "✓".green().bold());
                }
            }
            Err(LinkError::NotConnected) => {
                println!("  {} link is down; /connect again", "✗".red().bold());
            }
            Err(e) => println!("  {} {e}", "✗".red().bold()),
        }
    }

    // ── Activity log ────────────────────────────────────────────────────────

    fn cmd_logs(&self, query: LogQuery) {
        if let Some(remote) = &self.activity.remote {
            let queued = remote.recorder.queue().len().unwrap_or_default();
            println!(
                "  Activity is sent to {}; {queued} record(s) waiting for retry.",
                remote.endpoint.dimmed()
            );
        }
        let rows = match query {
            LogQuery::Recent(n) => self.activity.log.recent(n),
            LogQuery::ByType(kind, n) => self.activity.log.by_type(kind, n),
        };
        match rows {
            Ok(rows) if rows.is_empty() => println!("  {}", "No activity recorded.".dimmed()),
            Ok(rows) => {
                println!();
                for record in &rows {
                    println!("  {}", render_record(record));
                }
                println!();
            }
            Err(e) => println!("{} {e}", "Activity log error:".red()),
        }
    }

    fn record_session(&self, activity_type: ActivityType) {
        let recorder = self.activity.recorder();
        let user_id = self.config.user_id.clone();
        let detail = json!({ "client": "robolink-cli", "version": env!("CARGO_PKG_VERSION") });
        let result = self.runtime.block_on(async move {
            recorder
                .record(&user_id, activity_type, detail, Severity::Info)
                .await
        });
        if let Err(e) = result {
            debug!(activity_type = %activity_type, error = %e, "session activity not recorded");
        }
    }

    /// Stop any moving robot, close the link and log the operator out.
    pub fn shutdown(&mut self) {
        if self.link.is_some() {
            self.close_link();
        }
        self.record_session(ActivityType::Logout);
    }
}

/// Run the console until `/quit`, end of input or Ctrl-C.
pub fn run(mut console: Console, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {e}", "Terminal error".red());
            return;
        }
    };
    console.record_session(ActivityType::Login);

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let line = match editor.readline(&console.prompt()) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("{}", "Ctrl-C: stopping the robot and exiting.".yellow().bold());
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {e}", "Read error".red());
                break;
            }
        };
        if !line.trim().is_empty() {
            let _ = editor.add_history_entry(line.as_str());
        }
        match commands::parse(&line) {
            Ok(Input::Quit) => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Ok(input) => console.handle(input),
            Err(msg) => println!(
                "{} {msg}. Type {} for available commands.",
                "Error:".red(),
                "/help".bold()
            ),
        }
    }

    console.shutdown();
}

/// Print link state changes as they happen.
async fn watch(mut events: Subscription, name: String) {
    while let Some(event) = events.recv().await {
        if let SessionEvent::StateChanged { from, to } = event {
            println!("\n  {} {} → {}", name.bold(), from, paint_state(to));
        }
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Available commands:".bold().underline());
    let rows = [
        ("/robots", "List known robots and their addresses"),
        ("/connect <robot> [sim]", "Open a link (sim = built-in simulator)"),
        ("/status", "Connection state and latest telemetry"),
        ("/move <x> <y> <yaw>", "Drive the base, axes in [-1, 1]; /move stop"),
        ("/pose <x> <y> <z> <r>", "Arm end-effector target"),
        ("/joint <name> <angle> [speed]", "Move one joint"),
        ("/say <text>", "Text to speech"),
        ("/action <name>", "Run a preset action"),
        ("/home", "Return to the home position"),
        ("/mode <name>", "Switch operating mode"),
        ("/gait <n>", "Select gait (0 normal, 1 agile, 2 stable)"),
        ("/stance", "Toggle sit / stand"),
        ("/toggle <actuator> on|off", "Switch an actuator"),
        ("/logs [type] [n]", "Show recent activity"),
        ("/close", "Stop and close the current link"),
        ("/quit", "Stop the robot, close the link and exit"),
    ];
    for (cmd, what) in rows {
        println!("  {:<31} {what}", cmd.cyan());
    }
    println!();
}

fn paint_state(state: ConnectionState) -> colored::ColoredString {
    let label = state.to_string();
    match state {
        ConnectionState::Connected => label.green().bold(),
        ConnectionState::Connecting => label.cyan(),
        ConnectionState::Degraded => label.yellow().bold(),
        ConnectionState::Disconnected => label.red(),
    }
}

fn paint_battery(percent: u8) -> colored::ColoredString {
    let label = format!("{percent}%");
    match percent {
        0..=15 => label.red().bold(),
        16..=40 => label.yellow(),
        _ => label.green(),
    }
}

fn render_record(record: &ActivityRecord) -> String {
    let robot = record
        .detail
        .get("robot")
        .and_then(|v| v.as_str())
        .unwrap_or("-");
    let what = record
        .detail
        .get("action")
        .or_else(|| record.detail.get("event"))
        .or_else(|| record.detail.get("error"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    format!(
        "{} {:<8} {:<13} {:<8} {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.severity.as_str(),
        record.activity_type.as_str(),
        robot,
        what
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn console() -> Console {
        let log = Arc::new(ActivityLog::open_in_memory().unwrap());
        console_with(Activity { log, remote: None })
    }

    fn console_with(activity: Activity) -> Console {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let config = Config {
            user_id: "tester".into(),
            ..Config::default()
        };
        Console::new(runtime, config, activity)
    }

    fn wait_for_records(console: &Console, kind: ActivityType, count: usize) -> Vec<ActivityRecord> {
        let log = Arc::clone(&console.activity.log);
        console.runtime.block_on(async move {
            for _ in 0..100 {
                let rows = log.by_type(kind, 50).unwrap();
                if rows.len() >= count {
                    return rows;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            log.by_type(kind, 50).unwrap()
        })
    }

    #[test]
    fn simulated_robot_accepts_commands_and_logs_them() {
        let mut console = console();
        console.handle(Input::Connect {
            name: "dog".into(),
            sim: true,
        });
        let state = console.link.as_ref().map(|l| l.session.state());
        assert_eq!(state, Some(ConnectionState::Connected));

        console.handle(Input::Issue(CommandKind::SetMode(
            robolink_types::Mode::ToggleStance,
        )));
        let controls = wait_for_records(&console, ActivityType::RobotControl, 1);
        assert_eq!(controls[0].detail["robot"], "dog");
        assert_eq!(controls[0].user_id, "tester");
    }

    #[test]
    fn shutdown_stops_a_driving_robot_and_logs_out() {
        let mut console = console();
        console.handle(Input::Connect {
            name: "vehicle".into(),
            sim: true,
        });
        console.handle(Input::Drive(Motion::Velocity {
            x: 0.8,
            y: 0.0,
            yaw: 0.0,
        }));
        console.shutdown();

        assert!(console.link.is_none());
        // The drive command and the stop sent on shutdown.
        let controls = wait_for_records(&console, ActivityType::RobotControl, 2);
        assert_eq!(controls.len(), 2);
        assert_eq!(wait_for_records(&console, ActivityType::Logout, 1).len(), 1);
    }

    #[test]
    fn remote_collector_does_not_empty_the_local_log() {
        use robolink_activity::{FallbackQueue, HttpCollector};

        let endpoint = "http://127.0.0.1:1/logs".to_string();
        let collector = HttpCollector::new(endpoint.clone(), Duration::from_millis(500)).unwrap();
        let remote = Remote {
            endpoint,
            recorder: Arc::new(BestEffortRecorder::new(
                Arc::new(collector),
                FallbackQueue::open_in_memory().unwrap(),
            )),
        };
        let log = Arc::new(ActivityLog::open_in_memory().unwrap());
        let mut console = console_with(Activity {
            log,
            remote: Some(remote),
        });

        console.handle(Input::Connect {
            name: "dog".into(),
            sim: true,
        });
        console.handle(Input::Issue(CommandKind::Home));

        let controls = wait_for_records(&console, ActivityType::RobotControl, 1);
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].detail["action"], "home");
        assert_eq!(wait_for_records(&console, ActivityType::RobotAccess, 1).len(), 1);
    }

    #[test]
    fn commands_without_a_link_touch_nothing() {
        let mut console = console();
        console.handle(Input::Issue(CommandKind::Home));
        console.handle(Input::Drive(Motion::Velocity {
            x: 0.5,
            y: 0.0,
            yaw: 0.0,
        }));
        assert!(console.activity.log.is_empty().unwrap());
    }

    #[test]
    fn unknown_robot_leaves_console_unlinked() {
        let mut console = console();
        console.handle(Input::Connect {
            name: "toaster".into(),
            sim: false,
        });
        assert!(console.link.is_none());
    }

    #[test]
    fn record_line_shows_robot_and_action() {
        let record = ActivityRecord::new(
            "ana",
            ActivityType::RobotControl,
            json!({ "robot": "arm", "action": "move", "x": 200.0 }),
            Severity::Info,
        );
        let line = render_record(&record);
        assert!(line.contains("robot_control"));
        assert!(line.contains("arm"));
        assert!(line.ends_with("move"));
    }
}
