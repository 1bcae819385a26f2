//! Daemon startup lockfile, keyed per project root.
//!
//! `acquire()` uses `O_CREAT | O_EXCL` so two daemons racing on the same
//! project have exactly one winner. `read_valid()` validates the recorded
//! PID and auto-removes stale lockfiles left by a crash or SIGKILL.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::paths::ProjectPaths;
use crate::pidfile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonLockfile {
    pub pid: u32,
    pub project_root: String,
    pub started_at: String,
    pub version: String,
}

/// Result of trying to acquire the lockfile.
pub enum AcquireResult {
    /// We created the lockfile — we own it.
    Acquired,
    /// Another live daemon holds the lockfile.
    AlreadyRunning(DaemonLockfile),
    /// Stale lockfile was cleaned up — retry.
    StaleRemoved,
}

impl DaemonLockfile {
    pub fn for_project(paths: &ProjectPaths) -> Self {
        Self {
            pid: std::process::id(),
            project_root: paths.root().to_string_lossy().into_owned(),
            started_at: chrono::Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn path(paths: &ProjectPaths) -> PathBuf {
        paths.daemon_lockfile()
    }

    /// Try to exclusively create and write the lockfile.
    pub fn acquire(&self, path: &Path) -> std::io::Result<AcquireResult> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true) // O_CREAT | O_EXCL — fails if file exists
            .open(path)
        {
            Ok(mut file) => {
                let json = serde_json::to_string_pretty(self)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                file.write_all(json.as_bytes())?;
                file.sync_all()?;
                Ok(AcquireResult::Acquired)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match Self::read(path) {
                    Some(existing) if pidfile::pid_alive(existing.pid) => {
                        Ok(AcquireResult::AlreadyRunning(existing))
                    }
                    _ => {
                        info!("removing stale daemon lockfile");
                        Self::remove(path);
                        Ok(AcquireResult::StaleRemoved)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Acquire with one automatic retry after stale cleanup.
    pub fn acquire_or_fail(&self, path: &Path) -> Result<(), String> {
        for attempt in 0..2 {
            match self.acquire(path) {
                Ok(AcquireResult::Acquired) => return Ok(()),
                Ok(AcquireResult::AlreadyRunning(existing)) => {
                    return Err(format!(
                        "daemon already running (pid={}, project={})",
                        existing.pid, existing.project_root,
                    ));
                }
                Ok(AcquireResult::StaleRemoved) if attempt == 0 => {
                    info!("stale lockfile removed, retrying acquire");
                    continue;
                }
                Ok(AcquireResult::StaleRemoved) => {
                    return Err("failed to acquire lockfile after stale cleanup".into());
                }
                Err(e) => return Err(format!("lockfile I/O error: {e}")),
            }
        }
        Err("lockfile acquire failed".into())
    }

    pub fn read(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Read, validate the PID, and auto-remove stale entries.
    pub fn read_valid(path: &Path) -> Option<Self> {
        let lock = Self::read(path)?;
        if pidfile::pid_alive(lock.pid) {
            Some(lock)
        } else {
            info!(pid = lock.pid, "removing stale daemon lockfile (process not running)");
            Self::remove(path);
            None
        }
    }

    pub fn remove(path: &Path) {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        let path = DaemonLockfile::path(&paths);
        let lock = DaemonLockfile::for_project(&paths);

        assert!(matches!(lock.acquire(&path).unwrap(), AcquireResult::Acquired));
        // Second acquire sees a live holder (ourselves).
        assert!(matches!(
            lock.acquire(&path).unwrap(),
            AcquireResult::AlreadyRunning(_)
        ));
    }

    #[test]
    fn stale_lock_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        let path = DaemonLockfile::path(&paths);
        let stale = DaemonLockfile {
            pid: 4_000_000,
            project_root: "x".into(),
            started_at: String::new(),
            version: String::new(),
        };
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let lock = DaemonLockfile::for_project(&paths);
        // First attempt removes the stale file, retry wins.
        lock.acquire_or_fail(&path).unwrap();
        assert!(DaemonLockfile::read(&path).unwrap().pid == std::process::id());
    }

    #[test]
    fn read_valid_drops_dead_holder() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        let path = DaemonLockfile::path(&paths);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let stale = DaemonLockfile {
            pid: 4_000_000,
            project_root: "x".into(),
            started_at: String::new(),
            version: String::new(),
        };
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();
        assert!(DaemonLockfile::read_valid(&path).is_none());
        assert!(!path.exists());
    }
}
