//! Shared command context: resolved project paths, loaded configuration,
//! and constructors for the external clients.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use corral_core::config::FleetConfig;
use corral_core::paths::ProjectPaths;
use corral_fleet::identity::IdentityStore;
use corral_fleet::registry::Registry;
use corral_fleet::router::Router;
use corral_fleet::tracker::PerformanceTracker;
use corral_mail::{HttpMailClient, MailTransport, ReservationClient};
use corral_mux::{Multiplexer, TmuxClient};
use corral_store::{BeadStore, BrClient};

pub struct CliContext {
    pub paths: ProjectPaths,
    pub config: FleetConfig,
    pub json: bool,
}

impl CliContext {
    pub fn new(project_root: &str, json: bool) -> Result<Self> {
        let root = std::path::Path::new(project_root)
            .canonicalize()
            .with_context(|| format!("invalid project root {project_root}"))?;
        let paths = ProjectPaths::new(root);
        paths.ensure_layout().context("failed to create project layout")?;
        let config = FleetConfig::load(&paths);
        Ok(Self { paths, config, json })
    }

    pub fn store(&self) -> Arc<dyn BeadStore> {
        Arc::new(BrClient::new(self.paths.root()))
    }

    pub fn mux(&self) -> Arc<dyn Multiplexer> {
        Arc::new(TmuxClient::new())
    }

    pub fn mail(&self) -> Result<Arc<dyn MailTransport>> {
        Ok(Arc::new(HttpMailClient::new(
            self.config.mail.server_url.clone(),
            self.config.mail_token(),
        )?))
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::new(Registry::open(self.paths.clone()))
    }

    pub fn identity(&self) -> IdentityStore {
        IdentityStore::new(self.paths.clone())
    }

    pub fn tracker(&self) -> PerformanceTracker {
        PerformanceTracker::new(self.paths.clone())
    }

    /// The agent identity this invocation acts as (`AGENT_NAME` / conf).
    pub fn agent_name(&self) -> Result<String> {
        self.config
            .mail
            .agent_name
            .clone()
            .context("no agent identity: set AGENT_NAME or add it to the thresholds conf")
    }

    /// Sender for broadcasts: the configured agent, else the system name.
    pub fn sender_name(&self) -> String {
        self.config
            .mail
            .agent_name
            .clone()
            .unwrap_or_else(|| "SystemNotify".to_string())
    }

    pub fn router(&self) -> Result<Router> {
        Ok(Router::new(
            self.paths.clone(),
            self.registry(),
            self.identity(),
            self.mux(),
            self.mail()?,
            self.sender_name(),
            self.config.mail.sender_override.clone(),
        ))
    }

    pub fn reservations(&self) -> Result<ReservationClient> {
        let agent = self.agent_name()?;
        Ok(ReservationClient::new(
            self.mail()?,
            self.paths.clone(),
            self.config.reservations.clone(),
            agent,
            self.config.mail.project_key.clone(),
        ))
    }
}
