//! In-memory multiplexer double for tests and dry runs.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Multiplexer, MuxError, PaneInfo, Result};

/// Records every injected line and models panes as a plain list.
#[derive(Default)]
pub struct FakeMux {
    panes: Mutex<Vec<PaneInfo>>,
    sent: Mutex<Vec<(String, String)>>,
    next_id: AtomicU64,
}

impl FakeMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a live pane.
    pub fn add_pane(&self, pane_id: &str, session: &str, agent_name: Option<&str>) {
        self.panes.lock().unwrap().push(PaneInfo {
            pane_id: pane_id.to_string(),
            session: session.to_string(),
            current_path: "/".into(),
            current_command: "bash".into(),
            agent_name: agent_name.map(|s| s.to_string()),
        });
    }

    /// Lines injected so far, as `(pane_id, text)` pairs.
    pub fn sent_lines(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn pane_count(&self) -> usize {
        self.panes.lock().unwrap().len()
    }
}

#[async_trait]
impl Multiplexer for FakeMux {
    async fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        Ok(self.panes.lock().unwrap().clone())
    }

    async fn session_exists(&self, session: &str) -> Result<bool> {
        Ok(self.panes.lock().unwrap().iter().any(|p| p.session == session))
    }

    async fn new_session(&self, session: &str, _cwd: &Path) -> Result<String> {
        let id = format!("%{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 100);
        self.add_pane(&id, session, None);
        Ok(id)
    }

    async fn new_window(&self, session: &str, _name: &str, _cwd: &Path) -> Result<String> {
        let id = format!("%{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 100);
        self.add_pane(&id, session, None);
        Ok(id)
    }

    async fn send_text(&self, pane_id: &str, text: &str) -> Result<()> {
        let panes = self.panes.lock().unwrap();
        if !panes.iter().any(|p| p.pane_id == pane_id) {
            return Err(MuxError::PaneNotFound(pane_id.to_string()));
        }
        drop(panes);
        self.sent.lock().unwrap().push((pane_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<()> {
        let mut panes = self.panes.lock().unwrap();
        let before = panes.len();
        panes.retain(|p| p.pane_id != pane_id);
        if panes.len() == before {
            return Err(MuxError::PaneNotFound(pane_id.to_string()));
        }
        Ok(())
    }

    async fn set_pane_option(&self, pane_id: &str, key: &str, value: &str) -> Result<()> {
        let mut panes = self.panes.lock().unwrap();
        let pane = panes
            .iter_mut()
            .find(|p| p.pane_id == pane_id)
            .ok_or_else(|| MuxError::PaneNotFound(pane_id.to_string()))?;
        if key == "@agent_name" {
            pane.agent_name = Some(value.to_string());
        }
        Ok(())
    }
}
