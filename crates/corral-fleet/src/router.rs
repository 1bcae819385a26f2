//! Broadcast and mail routing.
//!
//! Resolves group addresses (`@all`, `@active`, `@swarm:X`, `@type:T`,
//! `@coordinators`) to agent names and dual-delivers to each recipient:
//! a non-executing comment line injected into the agent's pane, and a
//! durable mail sent against the recipient's own project so cross-project
//! routing works. Recipient sends run concurrently with a join barrier —
//! one slow recipient never serializes the rest.

use std::sync::Arc;

use corral_core::fsutil;
use corral_core::paths::ProjectPaths;
use corral_core::types::SwarmState;
use corral_mail::{Importance, MailTransport};
use corral_mux::Multiplexer;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::identity::IdentityStore;
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("unknown group address: {0}")]
    UnknownGroup(String),
    #[error("no recipients resolved from `{0}`")]
    NoRecipients(String),
    #[error("swarm state not found for `{0}`")]
    SwarmStateMissing(String),
    #[error("multiplexer error: {0}")]
    Mux(#[from] corral_mux::MuxError),
}

pub type Result<T> = std::result::Result<T, RouterError>;

// ---------------------------------------------------------------------------
// Delivery types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Both,
    TmuxOnly,
    MailOnly,
}

impl std::str::FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(DeliveryMode::Both),
            "tmux-only" | "tmux" => Ok(DeliveryMode::TmuxOnly),
            "mail-only" | "mail" => Ok(DeliveryMode::MailOnly),
            other => Err(format!("unknown delivery mode: {other}")),
        }
    }
}

/// Per-recipient channel status. `None` means the channel was not attempted
/// (mode, or dry run).
#[derive(Debug, Clone, Serialize)]
pub struct RecipientStatus {
    pub name: String,
    pub pane: Option<String>,
    pub tmux_ok: Option<bool>,
    pub mail_ok: Option<bool>,
}

impl RecipientStatus {
    fn delivered(&self, mode: DeliveryMode) -> bool {
        match mode {
            DeliveryMode::Both => {
                self.tmux_ok.unwrap_or(false) || self.mail_ok.unwrap_or(false)
            }
            DeliveryMode::TmuxOnly => self.tmux_ok.unwrap_or(false),
            DeliveryMode::MailOnly => self.mail_ok.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastOutcome {
    pub recipients: Vec<RecipientStatus>,
    pub dry_run: bool,
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct Router {
    paths: ProjectPaths,
    registry: Arc<Registry>,
    identity: IdentityStore,
    mux: Arc<dyn Multiplexer>,
    mail: Arc<dyn MailTransport>,
    sender: String,
    sender_override: Option<String>,
}

impl Router {
    pub fn new(
        paths: ProjectPaths,
        registry: Arc<Registry>,
        identity: IdentityStore,
        mux: Arc<dyn Multiplexer>,
        mail: Arc<dyn MailTransport>,
        sender: impl Into<String>,
        sender_override: Option<String>,
    ) -> Self {
        Self {
            paths,
            registry,
            identity,
            mux,
            mail,
            sender: sender.into(),
            sender_override,
        }
    }

    /// Resolve a recipient spec to agent names: a group address or a
    /// comma-separated explicit list.
    pub async fn resolve(&self, spec: &str) -> Result<Vec<String>> {
        let spec = spec.trim();
        let names = if let Some(group) = spec.strip_prefix('@') {
            match group {
                "all" => {
                    let mut names: Vec<String> = self
                        .registry
                        .instances()
                        .into_iter()
                        .map(|i| i.name)
                        .collect();
                    for (_, identity) in self.identity.bindings() {
                        if !names.contains(&identity.agent_mail_name) {
                            names.push(identity.agent_mail_name);
                        }
                    }
                    names.sort();
                    names
                }
                "active" => {
                    let live = self.mux.list_panes().await?;
                    self.identity.live_agents(&live)
                }
                "coordinators" => self
                    .registry
                    .coordinators()
                    .into_iter()
                    .map(|i| i.name)
                    .collect(),
                _ => {
                    if let Some(swarm) = group.strip_prefix("swarm:") {
                        let state: SwarmState =
                            fsutil::read_json(&self.paths.swarm_state_file(swarm))
                                .ok_or_else(|| RouterError::SwarmStateMissing(swarm.into()))?;
                        state.agents.into_iter().map(|a| a.name).collect()
                    } else if let Some(agent_type) = group.strip_prefix("type:") {
                        self.registry
                            .active()
                            .into_iter()
                            .filter(|i| i.agent_type == agent_type)
                            .map(|i| i.name)
                            .collect()
                    } else {
                        return Err(RouterError::UnknownGroup(spec.into()));
                    }
                }
            }
        } else {
            spec.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };
        if names.is_empty() {
            return Err(RouterError::NoRecipients(spec.into()));
        }
        Ok(names)
    }

    /// Broadcast to a recipient spec. `message_type` tags like `URGENT` or
    /// `BLOCKER` upgrade importance.
    pub async fn send(
        &self,
        spec: &str,
        subject: &str,
        body: &str,
        mode: DeliveryMode,
        message_type: Option<&str>,
        dry_run: bool,
    ) -> Result<BroadcastOutcome> {
        let recipients = self.resolve(spec).await?;
        let importance = match message_type.map(str::to_ascii_uppercase).as_deref() {
            Some("URGENT") | Some("BLOCKER") => Importance::Urgent,
            _ => Importance::Normal,
        };

        if dry_run {
            let statuses = recipients
                .into_iter()
                .map(|name| {
                    let pane = self.identity.pane_for_agent(&name);
                    debug!(recipient = %name, ?pane, "dry-run delivery intent");
                    RecipientStatus { name, pane, tmux_ok: None, mail_ok: None }
                })
                .collect();
            return Ok(BroadcastOutcome { recipients: statuses, dry_run: true, success: true });
        }

        let deliveries = recipients
            .iter()
            .map(|name| self.deliver_one(name, subject, body, mode, importance));
        let statuses: Vec<RecipientStatus> = join_all(deliveries).await;

        let success = statuses.iter().all(|s| s.delivered(mode));
        Ok(BroadcastOutcome { recipients: statuses, dry_run: false, success })
    }

    async fn deliver_one(
        &self,
        name: &str,
        subject: &str,
        body: &str,
        mode: DeliveryMode,
        importance: Importance,
    ) -> RecipientStatus {
        let pane = self.identity.pane_for_agent(name);

        let tmux_ok = if mode != DeliveryMode::MailOnly {
            Some(self.inject_pane(name, pane.as_deref(), subject).await)
        } else {
            None
        };

        let mail_ok = if mode != DeliveryMode::TmuxOnly {
            Some(self.send_mail(name, subject, body, importance).await)
        } else {
            None
        };

        RecipientStatus { name: name.to_string(), pane, tmux_ok, mail_ok }
    }

    /// Pane channel: a comment line, so nothing executes in the agent shell.
    async fn inject_pane(&self, name: &str, pane: Option<&str>, subject: &str) -> bool {
        let Some(pane) = pane else {
            debug!(recipient = %name, "no pane bound, skipping inject");
            return false;
        };
        let line = format!("# [corral] {subject}");
        match self.mux.send_text(pane, &line).await {
            Ok(()) => true,
            Err(e) => {
                warn!(recipient = %name, pane = %pane, error = %e, "pane inject failed");
                false
            }
        }
    }

    /// Mail channel: resolved against the recipient's own project, with the
    /// sender registered there first.
    async fn send_mail(
        &self,
        name: &str,
        subject: &str,
        body: &str,
        importance: Importance,
    ) -> bool {
        let project_key = self
            .identity
            .pane_for_agent(name)
            .and_then(|pane| self.identity.identity(&pane))
            .and_then(|identity| identity.project_root)
            .unwrap_or_else(|| self.paths.root().to_string_lossy().into_owned());

        let sender = self.sender_override.as_deref().unwrap_or(&self.sender);

        if let Err(e) = self.mail.ensure_project(&project_key).await {
            warn!(recipient = %name, error = %e, "ensure_project failed");
            return false;
        }
        if let Err(e) = self.mail.register_agent(&project_key, sender).await {
            warn!(recipient = %name, error = %e, "sender registration failed");
            return false;
        }
        match self
            .mail
            .send_message(
                &project_key,
                sender,
                std::slice::from_ref(&name.to_string()),
                subject,
                body,
                importance,
            )
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(recipient = %name, error = %e, "mail delivery failed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
