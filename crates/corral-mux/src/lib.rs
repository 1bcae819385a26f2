//! Typed client for the external terminal multiplexer (tmux).
//!
//! The multiplexer hosts every agent's pane; the control plane only asks it
//! to list panes, create/kill them, inject text, and stash per-pane
//! variables (`@agent_name`, `@llm_name`). [`Multiplexer`] is the seam so
//! the rest of the plane can be exercised without a live tmux server.

pub mod testing;

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("failed to launch multiplexer binary `{binary}`: {source}")]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("multiplexer command failed (exit {code:?}): {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },
    #[error("pane not found: {0}")]
    PaneNotFound(String),
}

pub type Result<T> = std::result::Result<T, MuxError>;

/// One live pane as reported by the multiplexer listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    pub pane_id: String,
    pub session: String,
    pub current_path: String,
    pub current_command: String,
    /// The `@agent_name` pane variable, when set.
    pub agent_name: Option<String>,
}

#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// List every pane on the server.
    async fn list_panes(&self) -> Result<Vec<PaneInfo>>;

    async fn session_exists(&self, session: &str) -> Result<bool>;

    /// Create a detached session; returns the initial pane id.
    async fn new_session(&self, session: &str, cwd: &Path) -> Result<String>;

    /// Create a window in an existing session; returns its pane id.
    async fn new_window(&self, session: &str, name: &str, cwd: &Path) -> Result<String>;

    /// Inject a line of text into a pane (with a trailing Enter).
    async fn send_text(&self, pane_id: &str, text: &str) -> Result<()>;

    async fn kill_pane(&self, pane_id: &str) -> Result<()>;

    /// Set a per-pane variable such as `@agent_name`.
    async fn set_pane_option(&self, pane_id: &str, key: &str, value: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// TmuxClient
// ---------------------------------------------------------------------------

const LIST_FORMAT: &str = "#{pane_id}\t#{session_name}\t#{pane_current_path}\t#{pane_current_command}\t#{@agent_name}";

pub struct TmuxClient {
    binary: String,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self { binary: "tmux".into() }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(binary = %self.binary, ?args, "running multiplexer command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MuxError::Launch { binary: self.binary.clone(), source: e })?;

        if !output.status.success() {
            return Err(MuxError::CommandFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_listing(raw: &str) -> Vec<PaneInfo> {
        raw.lines()
            .filter_map(|line| {
                let mut fields = line.split('\t');
                let pane_id = fields.next()?.trim();
                if pane_id.is_empty() {
                    return None;
                }
                let session = fields.next().unwrap_or("").to_string();
                let current_path = fields.next().unwrap_or("").to_string();
                let current_command = fields.next().unwrap_or("").to_string();
                let agent = fields.next().unwrap_or("").trim();
                Some(PaneInfo {
                    pane_id: pane_id.to_string(),
                    session,
                    current_path,
                    current_command,
                    agent_name: (!agent.is_empty()).then(|| agent.to_string()),
                })
            })
            .collect()
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Multiplexer for TmuxClient {
    async fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let raw = self.run(&["list-panes", "-a", "-F", LIST_FORMAT]).await?;
        Ok(Self::parse_listing(&raw))
    }

    async fn session_exists(&self, session: &str) -> Result<bool> {
        match self.run(&["has-session", "-t", session]).await {
            Ok(_) => Ok(true),
            Err(MuxError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn new_session(&self, session: &str, cwd: &Path) -> Result<String> {
        let cwd = cwd.to_string_lossy();
        let raw = self
            .run(&[
                "new-session", "-d", "-s", session, "-c", &cwd, "-P", "-F", "#{pane_id}",
            ])
            .await?;
        Ok(raw.trim().to_string())
    }

    async fn new_window(&self, session: &str, name: &str, cwd: &Path) -> Result<String> {
        let cwd = cwd.to_string_lossy();
        let raw = self
            .run(&[
                "new-window", "-d", "-t", session, "-n", name, "-c", &cwd, "-P", "-F",
                "#{pane_id}",
            ])
            .await?;
        Ok(raw.trim().to_string())
    }

    async fn send_text(&self, pane_id: &str, text: &str) -> Result<()> {
        self.run(&["send-keys", "-t", pane_id, text, "Enter"]).await?;
        Ok(())
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<()> {
        match self.run(&["kill-pane", "-t", pane_id]).await {
            Ok(_) => Ok(()),
            Err(MuxError::CommandFailed { stderr, .. }) if stderr.contains("can't find") => {
                Err(MuxError::PaneNotFound(pane_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn set_pane_option(&self, pane_id: &str, key: &str, value: &str) -> Result<()> {
        self.run(&["set-option", "-p", "-t", pane_id, key, value]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_parses_tab_separated_fields() {
        let raw = "%1\tmain\t/proj/a\tnvim\tamber\n%2\tmain\t/proj/a\tbash\t\n";
        let panes = TmuxClient::parse_listing(raw);
        assert_eq!(panes.len(), 2);
        assert_eq!(panes[0].pane_id, "%1");
        assert_eq!(panes[0].agent_name.as_deref(), Some("amber"));
        assert_eq!(panes[1].agent_name, None);
        assert_eq!(panes[1].current_command, "bash");
    }

    #[test]
    fn blank_lines_are_ignored() {
        let panes = TmuxClient::parse_listing("\n\n%3\ts\t/p\tzsh\t\n");
        assert_eq!(panes.len(), 1);
        assert_eq!(panes[0].pane_id, "%3");
    }

    #[tokio::test]
    async fn missing_binary_is_launch_error() {
        let client = TmuxClient::new().with_binary("definitely-not-tmux-xyz");
        assert!(matches!(
            client.list_panes().await,
            Err(MuxError::Launch { .. })
        ));
    }
}
