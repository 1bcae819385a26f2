//! PID guard files.
//!
//! Before acting on a recorded PID (kill, "already running" checks) the
//! record's command signature is re-verified against the live process, so a
//! recycled PID belonging to an unrelated process is treated as stale.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fsutil;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidRecord {
    pub pid: u32,
    /// Substring expected in the process's command line.
    pub command: String,
    pub started_at: DateTime<Utc>,
}

impl PidRecord {
    pub fn current(command: impl Into<String>) -> Self {
        Self {
            pid: std::process::id(),
            command: command.into(),
            started_at: Utc::now(),
        }
    }

    /// True iff the PID is alive and its command line still matches the
    /// recorded signature.
    pub fn is_live(&self) -> bool {
        pid_alive(self.pid) && command_matches(self.pid, &self.command)
    }
}

/// Write a PID record atomically.
pub fn write(path: &Path, record: &PidRecord) -> std::io::Result<()> {
    fsutil::atomic_write_json(path, record)
}

/// Read a PID record; `None` when missing or unparseable.
pub fn read(path: &Path) -> Option<PidRecord> {
    fsutil::read_json(path)
}

/// Read a record and validate it. Stale records (dead PID or signature
/// mismatch) are removed and `None` is returned.
pub fn read_live(path: &Path) -> Option<PidRecord> {
    let record = read(path)?;
    if record.is_live() {
        Some(record)
    } else {
        info!(path = %path.display(), pid = record.pid, "removing stale pid file");
        remove(path);
        None
    }
}

pub fn remove(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 checks existence without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    true
}

/// Compare the live process command line against the recorded signature.
/// Where the command line cannot be read (non-Linux, permissions), the
/// signature is assumed to match — liveness alone then decides.
#[cfg(target_os = "linux")]
fn command_matches(pid: u32, signature: &str) -> bool {
    match std::fs::read(format!("/proc/{pid}/cmdline")) {
        Ok(raw) => {
            let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ");
            cmdline.contains(signature)
        }
        Err(_) => true,
    }
}

#[cfg(not(target_os = "linux"))]
fn command_matches(_pid: u32, _signature: &str) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn bogus_pid_is_dead() {
        assert!(!pid_alive(4_000_000));
    }

    #[test]
    fn roundtrip_and_live_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.pid");
        // The test binary's cmdline contains the crate name.
        let record = PidRecord::current("corral");
        write(&path, &record).unwrap();
        let back = read(&path).unwrap();
        assert_eq!(back.pid, record.pid);
        assert!(read_live(&path).is_some());
    }

    #[test]
    fn dead_pid_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.pid");
        let record = PidRecord {
            pid: 4_000_000,
            command: "corral".into(),
            started_at: Utc::now(),
        };
        write(&path, &record).unwrap();
        assert!(read_live(&path).is_none());
        assert!(!path.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn signature_mismatch_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.pid");
        let record = PidRecord {
            pid: std::process::id(),
            command: "definitely-not-this-binary".into(),
            started_at: Utc::now(),
        };
        write(&path, &record).unwrap();
        // Alive PID, wrong signature — treated as recycled.
        assert!(read_live(&path).is_none());
    }
}
