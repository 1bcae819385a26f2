//! The combined control-plane daemon: monitor and scaler loops on
//! independent intervals, one `select!` driver, graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use corral_core::config::FleetConfig;
use corral_core::paths::ProjectPaths;
use corral_fleet::identity::IdentityStore;
use corral_fleet::registry::Registry;
use corral_fleet::router::Router;
use corral_fleet::spawner::{Spawner, Teardown};
use corral_mail::{HttpMailClient, MailTransport};
use corral_mux::{Multiplexer, TmuxClient};
use corral_store::{BeadStore, BrClient};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::monitor::QueueMonitor;
use crate::scaler::AutoScaler;
use crate::shutdown::ShutdownSignal;

/// Name used when the daemon itself sends mail.
const DAEMON_SENDER: &str = "SystemNotify";

pub struct CorralDaemon {
    config: FleetConfig,
    monitor: Mutex<QueueMonitor>,
    scaler: AutoScaler,
    shutdown: ShutdownSignal,
}

impl CorralDaemon {
    /// Wire the daemon against the real external services.
    pub fn build(paths: ProjectPaths, config: FleetConfig) -> Result<Self> {
        paths.ensure_layout().context("failed to create project layout")?;
        let store: Arc<dyn BeadStore> = Arc::new(BrClient::new(paths.root()));
        let mux: Arc<dyn Multiplexer> = Arc::new(TmuxClient::new());
        let mail: Arc<dyn MailTransport> = Arc::new(HttpMailClient::new(
            config.mail.server_url.clone(),
            config.mail_token(),
        )?);
        Ok(Self::with_clients(paths, config, store, mux, mail))
    }

    /// Wire the daemon against injected clients (tests, dry runs).
    pub fn with_clients(
        paths: ProjectPaths,
        config: FleetConfig,
        store: Arc<dyn BeadStore>,
        mux: Arc<dyn Multiplexer>,
        mail: Arc<dyn MailTransport>,
    ) -> Self {
        let registry = Arc::new(Registry::open(paths.clone()));
        let identity = IdentityStore::new(paths.clone());
        let sender = config
            .mail
            .agent_name
            .clone()
            .unwrap_or_else(|| DAEMON_SENDER.to_string());

        let router = || {
            Router::new(
                paths.clone(),
                registry.clone(),
                identity.clone(),
                mux.clone(),
                mail.clone(),
                sender.clone(),
                config.mail.sender_override.clone(),
            )
        };

        let spawner = Spawner::new(
            paths.clone(),
            registry.clone(),
            identity.clone(),
            mux.clone(),
            Duration::from_millis(config.scaler.spawn_delay_ms),
        );
        let teardown = Teardown::new(
            paths.clone(),
            registry.clone(),
            identity.clone(),
            mux.clone(),
            mail.clone(),
            store.clone(),
            router(),
            config.reservations.clone(),
            Duration::ZERO,
        );
        let monitor = QueueMonitor::new(
            paths.clone(),
            config.monitor.clone(),
            store.clone(),
            registry.clone(),
            identity.clone(),
            mux.clone(),
            router(),
        );
        let scaler = AutoScaler::new(
            paths,
            config.scaler.clone(),
            store,
            registry,
            spawner,
            teardown,
        );

        Self {
            config,
            monitor: Mutex::new(monitor),
            scaler,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// One tick of both loops — the `--once` mode and the test entry point.
    pub async fn run_once(&self) -> Result<()> {
        let now = Utc::now();
        self.monitor.lock().await.tick(now).await?;
        self.scaler.tick(now).await?;
        Ok(())
    }

    /// Run until shutdown. Monitor and scaler tick on their own intervals;
    /// each observes the shutdown signal and drains at most one more tick.
    pub async fn run(&self) -> Result<()> {
        info!(
            monitor_secs = self.config.monitor.check_interval_secs,
            scaler_secs = self.config.scaler.check_interval_secs,
            "daemon starting event loop"
        );

        let mut monitor_interval = tokio::time::interval(self.config.monitor.check_interval());
        let mut scaler_interval = tokio::time::interval(self.config.scaler.check_interval());
        // Consume the immediate first ticks so both loops don't fire at t=0.
        monitor_interval.tick().await;
        scaler_interval.tick().await;

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = monitor_interval.tick() => {
                    let now = Utc::now();
                    if let Err(e) = self.monitor.lock().await.tick(now).await {
                        error!(error = %e, "monitor tick failed");
                    }
                }
                _ = scaler_interval.tick() => {
                    let now = Utc::now();
                    if let Err(e) = self.scaler.tick(now).await {
                        error!(error = %e, "scaler tick failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping daemon loops");
                    break;
                }
            }
        }
        Ok(())
    }

    pub fn scaler(&self) -> &AutoScaler {
        &self.scaler
    }

    pub fn monitor(&self) -> &Mutex<QueueMonitor> {
        &self.monitor
    }
}
