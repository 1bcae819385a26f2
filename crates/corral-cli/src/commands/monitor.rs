use std::process::ExitCode;

use anyhow::{Context, Result};
use corral_core::activity::ActivityLog;
use corral_core::lockfile::DaemonLockfile;
use corral_daemon::monitor::MonitorState;

use crate::context::CliContext;

/// Spawn `corral-daemon` detached, logging into `pids/corral-daemon.log`.
pub fn start(ctx: &CliContext) -> Result<ExitCode> {
    let lock_path = DaemonLockfile::path(&ctx.paths);
    if let Some(existing) = DaemonLockfile::read_valid(&lock_path) {
        println!("monitor already running (pid {})", existing.pid);
        return Ok(ExitCode::SUCCESS);
    }

    let binary = daemon_binary();
    let log = std::fs::File::create(ctx.paths.daemon_log())
        .context("failed to create daemon log file")?;
    let child = std::process::Command::new(&binary)
        .arg("--project-root")
        .arg(ctx.paths.root())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::from(log.try_clone()?))
        .stderr(std::process::Stdio::from(log))
        .spawn()
        .with_context(|| format!("failed to launch {binary}"))?;

    println!("monitor started (pid {})", child.id());
    Ok(ExitCode::SUCCESS)
}

pub fn stop(ctx: &CliContext) -> Result<ExitCode> {
    let lock_path = DaemonLockfile::path(&ctx.paths);
    match DaemonLockfile::read_valid(&lock_path) {
        Some(lock) => {
            #[cfg(unix)]
            unsafe {
                libc::kill(lock.pid as i32, libc::SIGTERM);
            }
            println!("sent SIGTERM to monitor (pid {})", lock.pid);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("warning: no running monitor found");
            Ok(ExitCode::SUCCESS)
        }
    }
}

pub fn status(ctx: &CliContext) -> Result<ExitCode> {
    let lock_path = DaemonLockfile::path(&ctx.paths);
    match DaemonLockfile::read_valid(&lock_path) {
        Some(lock) => println!("monitor: running (pid {}, since {})", lock.pid, lock.started_at),
        None => println!("monitor: not running"),
    }
    if let Some(state) = MonitorState::read(&ctx.paths) {
        let live = if state.is_live() { "live" } else { "stale" };
        println!("last tick: {} ({live} pid {})", state.last_tick.to_rfc3339(), state.pid);
    }
    if ctx.paths.queue_alert_flag().exists() {
        let level = std::fs::read_to_string(ctx.paths.queue_alert_flag()).unwrap_or_default();
        println!("queue alert: {}", level.trim());
    }
    if let Ok(flag) = std::fs::read_to_string(ctx.paths.health_alert_flag()) {
        println!("health alert: {}", flag.trim());
    }

    let tail = ActivityLog::new(&ctx.paths).tail(10);
    if !tail.is_empty() {
        println!("recent events:");
        for event in tail {
            println!(
                "  {} {:?} {}",
                event.timestamp.format("%H:%M:%S"),
                event.event,
                event.agent.unwrap_or_default()
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Follow the activity stream until interrupted.
pub async fn attach(ctx: &CliContext) -> Result<ExitCode> {
    let log = ActivityLog::new(&ctx.paths);
    let mut seen = log.read_all().len();
    for event in log.tail(10) {
        print_event(&event);
    }
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {
                let events = log.read_all();
                for event in events.iter().skip(seen) {
                    print_event(event);
                }
                seen = events.len();
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_event(event: &corral_core::types::ActivityEvent) {
    println!(
        "{} {:?} {} {}",
        event.timestamp.to_rfc3339(),
        event.event,
        event.agent.clone().unwrap_or_default(),
        event.payload
    );
}

/// Prefer a sibling `corral-daemon` next to this binary, else rely on PATH.
fn daemon_binary() -> String {
    if let Ok(current) = std::env::current_exe() {
        if let Some(dir) = current.parent() {
            let sibling = dir.join("corral-daemon");
            if sibling.exists() {
                return sibling.to_string_lossy().into_owned();
            }
        }
    }
    "corral-daemon".to_string()
}
