//! corral-daemon — the queue & health monitor and auto-scaler loops for
//! one project, guarded by a per-project lockfile.

use anyhow::{Context, Result};
use corral_core::config::FleetConfig;
use corral_core::lockfile::DaemonLockfile;
use corral_core::paths::ProjectPaths;
use corral_daemon::daemon::CorralDaemon;
use tracing::info;

struct Args {
    project_root: std::path::PathBuf,
    once: bool,
    json_logs: bool,
    replace: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        project_root: std::path::PathBuf::from("."),
        once: false,
        json_logs: false,
        replace: false,
    };
    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--project-root" | "-p" => {
                if let Some(value) = argv.next() {
                    args.project_root = value.into();
                }
            }
            "--once" => args.once = true,
            "--json-logs" => args.json_logs = true,
            "--replace" | "-r" => args.replace = true,
            other => {
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
    }
    args
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();
    if args.json_logs {
        corral_telemetry::logging::init_logging_json("corral-daemon", "info");
    } else {
        corral_telemetry::logging::init_logging("corral-daemon", "info");
    }

    let root = args
        .project_root
        .canonicalize()
        .with_context(|| format!("invalid project root {}", args.project_root.display()))?;
    let paths = ProjectPaths::new(root);
    paths.ensure_layout()?;
    let config = FleetConfig::load(&paths);

    let daemon = CorralDaemon::build(paths.clone(), config)?;

    if args.once {
        // Single combined tick, no lockfile, no loops.
        daemon.run_once().await?;
        return Ok(());
    }

    // --- Startup guard: one daemon per project ---
    let lock_path = DaemonLockfile::path(&paths);
    if let Some(existing) = DaemonLockfile::read_valid(&lock_path) {
        if args.replace {
            info!(pid = existing.pid, "replacing existing daemon (--replace)");
            #[cfg(unix)]
            unsafe {
                libc::kill(existing.pid as i32, libc::SIGTERM);
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            DaemonLockfile::remove(&lock_path);
        } else {
            eprintln!(
                "corral-daemon already running (pid={}, project={})\n  Hint: use --replace to restart it.",
                existing.pid, existing.project_root,
            );
            std::process::exit(1);
        }
    }
    let lockfile = DaemonLockfile::for_project(&paths);
    if let Err(msg) = lockfile.acquire_or_fail(&lock_path) {
        eprintln!("failed to acquire lockfile: {msg}");
        std::process::exit(1);
    }
    info!(path = %lock_path.display(), "lockfile written");

    // Wire ctrl-c / SIGTERM to graceful shutdown + lockfile removal.
    let shutdown = daemon.shutdown_handle();
    {
        let lock_path = lock_path.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            info!("ctrl-c received, initiating shutdown");
            DaemonLockfile::remove(&lock_path);
            shutdown.trigger();
        });
    }

    let result = daemon.run().await;
    DaemonLockfile::remove(&lock_path);
    info!("daemon stopped");
    result
}
