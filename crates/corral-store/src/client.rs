//! `br` subprocess client.
//!
//! Relies on `br ... --json` emitting one JSON array (listings) or object
//! (`show`). Fields consumed: `id`, `title`, `description`, `labels`,
//! `status`, `owner`/`assignee`, `updated`, `dependencies` — everything else
//! is ignored, and missing fields default.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use corral_core::types::{Bead, BeadStatus};
use tokio::process::Command;
use tracing::debug;

use crate::{BeadStore, Result, StoreError};

pub struct BrClient {
    binary: String,
    project_root: PathBuf,
}

impl BrClient {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self { binary: "br".into(), project_root: project_root.into() }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(binary = %self.binary, ?args, "running bead store command");
        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.project_root)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| StoreError::Launch { binary: self.binary.clone(), source: e })?;

        if !output.status.success() {
            return Err(StoreError::CommandFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_beads(raw: &str) -> Result<Vec<Bead>> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(trimmed).map_err(|e| StoreError::Parse(e.to_string()))
    }

    fn parse_bead(raw: &str) -> Result<Bead> {
        serde_json::from_str(raw.trim()).map_err(|e| StoreError::Parse(e.to_string()))
    }
}

#[async_trait]
impl BeadStore for BrClient {
    async fn ready(&self) -> Result<Vec<Bead>> {
        let raw = self.run(&["ready", "--json"]).await?;
        Self::parse_beads(&raw)
    }

    async fn list(&self, status: Option<BeadStatus>) -> Result<Vec<Bead>> {
        let raw = match status {
            Some(status) => {
                self.run(&["list", "--status", status.as_str(), "--json"]).await?
            }
            None => self.run(&["list", "--json"]).await?,
        };
        Self::parse_beads(&raw)
    }

    async fn show(&self, id: &str) -> Result<Bead> {
        let raw = self.run(&["show", id, "--json"]).await.map_err(|e| match e {
            StoreError::CommandFailed { code: Some(1), .. } => StoreError::NotFound(id.into()),
            other => other,
        })?;
        Self::parse_bead(&raw)
    }

    async fn update(
        &self,
        id: &str,
        status: Option<BeadStatus>,
        assignee: Option<&str>,
    ) -> Result<()> {
        let mut args = vec!["update", id];
        if let Some(status) = &status {
            args.push("--status");
            args.push(status.as_str());
        }
        if let Some(assignee) = assignee {
            args.push("--assignee");
            args.push(assignee);
        }
        if args.len() == 2 {
            return Ok(()); // nothing to change
        }
        self.run(&args).await?;
        Ok(())
    }

    async fn close(&self, id: &str) -> Result<()> {
        self.run(&["close", id]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listing_with_aliases_and_gaps() {
        let raw = r#"[
            {"id":"bd-1","title":"Add login API","status":"ready","labels":["backend"]},
            {"id":"bd-2","title":"Style header","status":"in_progress","assignee":"amber",
             "updated":"2026-03-01T10:00:00Z","description":"css tweaks"}
        ]"#;
        let beads = BrClient::parse_beads(raw).unwrap();
        assert_eq!(beads.len(), 2);
        assert_eq!(beads[0].labels, vec!["backend"]);
        assert!(beads[0].owner.is_none());
        assert_eq!(beads[1].owner.as_deref(), Some("amber"));
        assert_eq!(beads[1].status, BeadStatus::InProgress);
        assert!(beads[1].updated_at.is_some());
    }

    #[test]
    fn empty_output_is_empty_listing() {
        assert!(BrClient::parse_beads("").unwrap().is_empty());
        assert!(BrClient::parse_beads("\n").unwrap().is_empty());
    }

    #[test]
    fn garbage_output_is_a_parse_error() {
        assert!(matches!(
            BrClient::parse_beads("not json"),
            Err(StoreError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_launch_error() {
        let client = BrClient::new("/tmp").with_binary("definitely-not-a-real-binary-xyz");
        let err = client.ready().await.unwrap_err();
        assert!(matches!(err, StoreError::Launch { .. }));
    }
}
