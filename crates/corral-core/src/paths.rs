//! The on-disk coordination layout, rooted at the project directory.
//!
//! Layout (relative to the project root):
//!
//! ```text
//! pids/                       per-pane name files, monitor pids, swarm state
//! panes/                      per-pane identity files (+ archive/)
//! .beads/                     shared JSONL logs, thresholds conf, alert flags
//! .agent-profiles/types.yaml  agent type catalog
//! .agent-profiles/instances/  registered agent instances
//! .agent-mail-project-id      optional product marker for cross-repo work
//! ```

use std::path::{Path, PathBuf};

/// Replace the characters tmux uses in pane ids (`:` and `.`) so the id can
/// name a file.
pub fn safe_pane(pane_id: &str) -> String {
    pane_id.replace([':', '.'], "-")
}

/// Derive the mail-service project slug from an absolute project root:
/// lowercased, with every non-alphanumeric run collapsed to a single dash.
pub fn project_slug(root: &Path) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for ch in root.to_string_lossy().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Resolved paths for one project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slug(&self) -> String {
        project_slug(&self.root)
    }

    // -- top-level directories --

    pub fn pids_dir(&self) -> PathBuf {
        self.root.join("pids")
    }

    pub fn panes_dir(&self) -> PathBuf {
        self.root.join("panes")
    }

    pub fn pane_archive_dir(&self) -> PathBuf {
        self.panes_dir().join("archive")
    }

    pub fn beads_dir(&self) -> PathBuf {
        self.root.join(".beads")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join(".agent-profiles")
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.profiles_dir().join("instances")
    }

    // -- catalog and instances --

    pub fn types_catalog(&self) -> PathBuf {
        self.profiles_dir().join("types.yaml")
    }

    pub fn instance_file(&self, name: &str) -> PathBuf {
        self.instances_dir().join(format!("{name}.json"))
    }

    // -- per-pane files --

    pub fn pane_name_file(&self, pane_id: &str) -> PathBuf {
        self.pids_dir()
            .join(format!("{}.agent-name", safe_pane(pane_id)))
    }

    pub fn pane_identity_file(&self, pane_id: &str) -> PathBuf {
        self.panes_dir()
            .join(format!("{}.identity", safe_pane(pane_id)))
    }

    /// PID file of the per-pane mail monitor helper.
    pub fn pane_mail_monitor_pid(&self, pane_id: &str) -> PathBuf {
        self.pids_dir()
            .join(format!("{}.mail-monitor.pid", safe_pane(pane_id)))
    }

    pub fn disk_monitor_pid(&self) -> PathBuf {
        self.pids_dir().join("disk-monitor.pid")
    }

    // -- swarm state --

    pub fn swarm_state_file(&self, session: &str) -> PathBuf {
        self.pids_dir().join(format!("swarm-{session}.state"))
    }

    // -- shared logs and flags under .beads/ --

    pub fn thresholds_conf(&self) -> PathBuf {
        self.beads_dir().join("queue-thresholds.conf")
    }

    pub fn activity_log(&self) -> PathBuf {
        self.beads_dir().join("agent-activity.jsonl")
    }

    pub fn queue_events_log(&self) -> PathBuf {
        self.beads_dir().join("queue-events.jsonl")
    }

    pub fn heartbeat_log(&self) -> PathBuf {
        self.beads_dir().join("agent-heartbeats.jsonl")
    }

    pub fn performance_log(&self) -> PathBuf {
        self.beads_dir().join("agent-performance.jsonl")
    }

    pub fn active_tracking_log(&self) -> PathBuf {
        self.beads_dir().join("active-task-tracking.jsonl")
    }

    pub fn mail_read_log(&self) -> PathBuf {
        self.beads_dir().join("mail-read.jsonl")
    }

    pub fn health_alert_flag(&self) -> PathBuf {
        self.beads_dir().join("agent-health-alert.flag")
    }

    pub fn queue_alert_flag(&self) -> PathBuf {
        self.beads_dir().join("queue-alert.flag")
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.beads_dir().join("reserve-pending")
    }

    pub fn pending_file(&self, key: &str) -> PathBuf {
        self.pending_dir().join(format!("{key}.pending"))
    }

    // -- monitor / daemon state --

    pub fn monitor_state_file(&self) -> PathBuf {
        self.pids_dir().join("queue-monitor.pid")
    }

    pub fn daemon_lockfile(&self) -> PathBuf {
        self.pids_dir().join("corral-daemon.lock")
    }

    pub fn daemon_log(&self) -> PathBuf {
        self.pids_dir().join("corral-daemon.log")
    }

    // -- product marker --

    pub fn product_marker(&self) -> PathBuf {
        self.root.join(".agent-mail-project-id")
    }

    /// Read the product uid, if this project participates in a product.
    pub fn product_uid(&self) -> Option<String> {
        let text = std::fs::read_to_string(self.product_marker()).ok()?;
        let uid = text.trim().to_string();
        (!uid.is_empty()).then_some(uid)
    }

    /// Create every directory the control plane writes into.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in [
            self.pids_dir(),
            self.panes_dir(),
            self.pane_archive_dir(),
            self.beads_dir(),
            self.pending_dir(),
            self.instances_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_pane_replaces_separators() {
        assert_eq!(safe_pane("%12"), "%12");
        assert_eq!(safe_pane("main:1.2"), "main-1-2");
    }

    #[test]
    fn slug_is_lowercase_dashed() {
        assert_eq!(project_slug(Path::new("/proj/a")), "proj-a");
        assert_eq!(project_slug(Path::new("/Users/Dev/My Repo")), "users-dev-my-repo");
    }

    #[test]
    fn pane_files_use_safe_names() {
        let paths = ProjectPaths::new("/tmp/p");
        assert!(paths
            .pane_name_file("main:1.2")
            .ends_with("pids/main-1-2.agent-name"));
        assert!(paths
            .pane_identity_file("main:1.2")
            .ends_with("panes/main-1-2.identity"));
    }

    #[test]
    fn ensure_layout_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        paths.ensure_layout().unwrap();
        assert!(paths.pending_dir().is_dir());
        assert!(paths.instances_dir().is_dir());
        assert!(paths.pane_archive_dir().is_dir());
    }

    #[test]
    fn product_uid_absent_when_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        assert!(paths.product_uid().is_none());
        std::fs::write(paths.product_marker(), "prod-42\n").unwrap();
        assert_eq!(paths.product_uid().as_deref(), Some("prod-42"));
    }
}
