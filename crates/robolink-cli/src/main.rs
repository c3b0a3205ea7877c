//! `robolink` – operator console for lab robots.
//!
//! The binary:
//!
//! 1. Installs tracing (compact or JSON logs on stderr, optional OTLP export).
//! 2. Loads `~/.robolink/config.toml`, running a **First-Run Wizard** when the
//!    file is absent.
//! 3. Opens the activity log (local SQLite, plus a remote collector with a
//!    retry queue when one is configured).
//! 4. Drops the operator into an **interactive console** with slash-commands
//!    (`/connect`, `/status`, `/move`, `/logs`, `/help`, …).
//! 5. On **Ctrl-C** or `/quit`, stops a moving robot and closes its link.

mod commands;
mod config;
mod repl;
mod telemetry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use colored::Colorize;
use robolink_activity::{ActivityLog, BestEffortRecorder, FallbackQueue, HttpCollector};
use tracing::{info, warn};

use crate::config::Config;
use crate::repl::{Activity, Console, Remote};

const COLLECTOR_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    let _tracing = telemetry::init_tracing("robolink");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    // While the prompt is active the line editor sees Ctrl-C itself; this
    // handler covers the time spent waiting on a robot.
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – the robot will be stopped after the current request."
                .yellow()
                .bold()
        );
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Runtime and activity log ──────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("robolink-worker")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start runtime".red());
            std::process::exit(1);
        }
    };

    let activity = match open_activity(&cfg) {
        Ok(activity) => activity,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to open activity log".red());
            std::process::exit(1);
        }
    };

    println!(
        "  Operator {} – type {} for a list of commands.\n",
        cfg.user_id.bold(),
        "/help".bold().cyan()
    );

    // ── Interactive console ───────────────────────────────────────────────
    repl::run(Console::new(runtime, cfg, activity), shutdown);
}

/// Open the local log, purge expired records and wire the remote collector
/// when one is configured.
fn open_activity(cfg: &Config) -> Result<Activity, String> {
    if let Some(parent) = std::path::Path::new(&cfg.activity_db).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let log = Arc::new(ActivityLog::open(&cfg.activity_db).map_err(|e| e.to_string())?);

    match retention_cutoff(Utc::now(), cfg.log_retention_days) {
        Some(cutoff) => match log.purge_older_than(cutoff) {
            Ok(0) => {}
            Ok(purged) => info!(purged, "expired activity records removed"),
            Err(e) => warn!(error = %e, "activity purge failed"),
        },
        None => warn!(
            days = cfg.log_retention_days,
            "retention period out of range, purge skipped"
        ),
    }

    let remote = match &cfg.activity_endpoint {
        Some(endpoint) => {
            let collector =
                HttpCollector::new(endpoint.clone(), COLLECTOR_TIMEOUT).map_err(|e| e.to_string())?;
            let queue = FallbackQueue::open(&cfg.activity_db).map_err(|e| e.to_string())?;
            Some(Remote {
                endpoint: endpoint.clone(),
                recorder: Arc::new(BestEffortRecorder::new(Arc::new(collector), queue)),
            })
        }
        None => None,
    };
    Ok(Activity { log, remote })
}

/// Oldest timestamp kept under a retention of `days`, or `None` when the
/// period reaches past the representable calendar.
fn retention_cutoff(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(days)).and_then(|keep| now.checked_sub_signed(keep))
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      robolink First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found. Let's set up the console.\n");

    let mut cfg = Config::default();

    cfg.user_id = prompt_line(
        &format!("  Operator id [{}]: ", cfg.user_id),
        &cfg.user_id,
    );

    let endpoint = prompt_line("  Remote activity collector URL (empty for local only): ", "");
    cfg.activity_endpoint = (!endpoint.is_empty()).then_some(endpoint);

    let throttle = prompt_line(
        &format!("  Motion command interval in ms [{}]: ", cfg.throttle_ms),
        &cfg.throttle_ms.to_string(),
    );
    if let Ok(ms) = throttle.parse::<u64>() {
        cfg.throttle_ms = ms;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"           __          ___       __  "#.bold().cyan());
    println!("{}", r#"  _______ / /  ___  __/ (_)__   / /__"#.bold().cyan());
    println!("{}", r#" / __/ _ \/ _ \/ _ \/ / / / _ \ /  '_/"#.bold().cyan());
    println!("{}", r#"/_/  \___/_.__/\___/_/_/_/_//_//_/\_\ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "robolink".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Robot operator console");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{msg}");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim();
            if t.is_empty() {
                default.to_string()
            } else {
                t.to_string()
            }
        }
        Err(_) => default.to_string(),
    }
}
