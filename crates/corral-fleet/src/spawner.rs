//! Swarm spawn and teardown.
//!
//! Spawn allocates panes in a tmux session, binds identities, registers
//! instances, and records the swarm state file. Teardown runs the cascade:
//! release reservations, notify the team, kill panes, archive state, remove
//! name files, and report. Every teardown step tolerates partial failure —
//! the only fatal condition is an unreadable swarm state targeted by id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use corral_core::activity::ActivityLog;
use corral_core::config::ReservationConfig;
use corral_core::fsutil;
use corral_core::paths::ProjectPaths;
use corral_core::types::{ActivityKind, BeadStatus, SwarmAgent, SwarmState};
use corral_mail::{MailTransport, ReleaseSpec, ReservationClient};
use corral_mux::Multiplexer;
use corral_store::BeadStore;
use serde_json::json;
use tracing::{info, warn};

use crate::identity::{IdentityError, IdentityStore};
use crate::registry::{Registry, RegistryError};
use crate::router::{DeliveryMode, Router};

/// Fixed pool of agent names; generated suffixes only when exhausted.
pub const NAME_POOL: &[&str] = &[
    "amber", "basil", "cedar", "dahlia", "ember", "fern", "garnet", "hazel",
    "iris", "juniper", "kestrel", "larch", "maple", "nettle", "oak", "poppy",
    "quince", "rowan", "sage", "thistle", "umber", "violet", "willow", "yarrow",
];

/// Spawn slower than this is a warning, not a failure.
const SPAWN_WARN: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("multiplexer error: {0}")]
    Mux(#[from] corral_mux::MuxError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    /// The swarm state file is unreadable while explicitly targeted.
    #[error("swarm state for `{0}` is missing or corrupt")]
    StateUnreadable(String),
    /// Pre-checks found work in flight; nothing was torn down.
    #[error("teardown blocked: {}", reasons.join("; "))]
    Blocked { reasons: Vec<String> },
}

// ---------------------------------------------------------------------------
// Spawner
// ---------------------------------------------------------------------------

pub struct Spawner {
    paths: ProjectPaths,
    registry: Arc<Registry>,
    identity: IdentityStore,
    mux: Arc<dyn Multiplexer>,
    activity: ActivityLog,
    spawn_delay: Duration,
}

impl Spawner {
    pub fn new(
        paths: ProjectPaths,
        registry: Arc<Registry>,
        identity: IdentityStore,
        mux: Arc<dyn Multiplexer>,
        spawn_delay: Duration,
    ) -> Self {
        let activity = ActivityLog::new(&paths);
        Self { paths, registry, identity, mux, activity, spawn_delay }
    }

    /// Spawn `count` agents of `agent_type` into one swarm session.
    pub async fn spawn_swarm(
        &self,
        count: u32,
        agent_type: &str,
        session: Option<&str>,
    ) -> Result<SwarmState, SpawnError> {
        if !self.registry.validate(agent_type) {
            return Err(RegistryError::InvalidType(agent_type.into()).into());
        }
        let session = session
            .map(str::to_string)
            .unwrap_or_else(|| format!("swarm-{agent_type}"));
        let started = Instant::now();

        // First pane comes free with a fresh session.
        let mut spare_pane = if self.mux.session_exists(&session).await? {
            None
        } else {
            Some(self.mux.new_session(&session, self.paths.root()).await?)
        };

        let mut used: Vec<String> = self
            .registry
            .instances()
            .into_iter()
            .map(|i| i.name)
            .collect();

        let mut agents = Vec::new();
        for index in 0..count {
            if index > 0 {
                tokio::time::sleep(self.spawn_delay).await;
            }
            let name = pick_name(agent_type, &used);
            used.push(name.clone());

            let pane_id = match spare_pane.take() {
                Some(pane) => pane,
                None => self.mux.new_window(&session, &name, self.paths.root()).await?,
            };

            let live = self.mux.list_panes().await?;
            self.identity.bind(&pane_id, &name, agent_type, &live)?;
            if let Err(e) = self.mux.set_pane_option(&pane_id, "@agent_name", &name).await {
                warn!(pane = %pane_id, error = %e, "failed to set pane option");
            }
            self.registry.register(&name, agent_type)?;
            self.activity.record(
                ActivityKind::Spawn,
                &name,
                json!({ "type": agent_type, "pane": pane_id, "session": session }),
            );
            info!(agent = %name, pane = %pane_id, "spawned agent");
            agents.push(SwarmAgent { index, name, pane_id });
        }

        let state = SwarmState {
            session: session.clone(),
            count,
            agent_type: agent_type.to_string(),
            spawn_time: Utc::now(),
            agents,
            product_uid: self.paths.product_uid(),
        };
        fsutil::atomic_write_json(&self.paths.swarm_state_file(&session), &state)?;

        let elapsed = started.elapsed();
        if elapsed > SPAWN_WARN {
            warn!(secs = elapsed.as_secs(), "swarm spawn exceeded the expected window");
        }
        Ok(state)
    }
}

/// First free pool name, falling back to `{type}-{short id}`.
fn pick_name(agent_type: &str, used: &[String]) -> String {
    for name in NAME_POOL {
        if !used.iter().any(|u| u == name) {
            return (*name).to_string();
        }
    }
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{agent_type}-{}", &suffix[..6])
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum TeardownTarget {
    Swarm(String),
    Agent(String),
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TeardownReport {
    pub agents: Vec<String>,
    pub reservations_released: usize,
    pub panes_killed: usize,
    pub duration_secs: u64,
    pub completed: usize,
    pub in_progress: usize,
    /// `completed / (completed + in_progress)`; absent when neither exists.
    pub efficiency: Option<f64>,
    pub warnings: Vec<String>,
}

pub struct Teardown {
    paths: ProjectPaths,
    registry: Arc<Registry>,
    identity: IdentityStore,
    mux: Arc<dyn Multiplexer>,
    mail: Arc<dyn MailTransport>,
    store: Arc<dyn BeadStore>,
    router: Router,
    reservation_config: ReservationConfig,
    activity: ActivityLog,
    grace: Duration,
}

impl Teardown {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        paths: ProjectPaths,
        registry: Arc<Registry>,
        identity: IdentityStore,
        mux: Arc<dyn Multiplexer>,
        mail: Arc<dyn MailTransport>,
        store: Arc<dyn BeadStore>,
        router: Router,
        reservation_config: ReservationConfig,
        grace: Duration,
    ) -> Self {
        let activity = ActivityLog::new(&paths);
        Self {
            paths,
            registry,
            identity,
            mux,
            mail,
            store,
            router,
            reservation_config,
            activity,
            grace,
        }
    }

    pub async fn run(
        &self,
        target: TeardownTarget,
        force: bool,
    ) -> Result<TeardownReport, TeardownError> {
        let started = Instant::now();
        let mut report = TeardownReport::default();

        let (agents, swarm_session) = match &target {
            TeardownTarget::Swarm(session) => {
                let state: SwarmState =
                    fsutil::read_json(&self.paths.swarm_state_file(session))
                        .ok_or_else(|| TeardownError::StateUnreadable(session.clone()))?;
                let names = state.agents.iter().map(|a| a.name.clone()).collect();
                (names, Some(session.clone()))
            }
            TeardownTarget::Agent(name) => (vec![name.clone()], None),
        };
        report.agents = agents.clone();

        // Workload snapshot, also reused for the efficiency figure.
        let (completed, in_progress) = self.workload_for(&agents).await;
        report.completed = completed;
        report.in_progress = in_progress;

        if !force {
            let mut reasons = Vec::new();
            if in_progress > 0 {
                reasons.push(format!("{in_progress} bead(s) still in progress"));
            }
            match self.held_reservations(&agents).await {
                Ok(0) => {}
                Ok(n) => reasons.push(format!("{n} active reservation(s)")),
                Err(e) => report.warnings.push(format!("reservation check failed: {e}")),
            }
            if let Some(dirty) = self.repo_dirty().await {
                if dirty {
                    reasons.push("uncommitted repo state".into());
                }
            }
            if !reasons.is_empty() {
                return Err(TeardownError::Blocked { reasons });
            }
        }

        // 1. Release every reservation held by departing agents.
        for agent in &agents {
            let client = ReservationClient::new(
                self.mail.clone(),
                self.paths.clone(),
                self.reservation_config.clone(),
                agent.clone(),
                None,
            );
            match client.release(ReleaseSpec::All).await {
                Ok(release) => report.reservations_released += release.released.len(),
                Err(e) => report.warnings.push(format!("release for {agent} failed: {e}")),
            }
        }

        // 2. Shutdown notice to the team; a mail outage never blocks teardown.
        let subject = match &swarm_session {
            Some(session) => format!("[teardown] swarm {session} shutting down"),
            None => format!("[teardown] agent {} shutting down", agents.join(",")),
        };
        if let Err(e) = self
            .router
            .send("@all", &subject, &format!("agents: {}", agents.join(", ")),
                  DeliveryMode::Both, None, false)
            .await
        {
            report.warnings.push(format!("shutdown broadcast failed: {e}"));
        }

        // 3. Kill panes after the grace delay.
        if !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }
        for agent in &agents {
            let Some(pane) = self.identity.pane_for_agent(agent) else {
                report.warnings.push(format!("{agent} has no bound pane"));
                continue;
            };
            match self.mux.kill_pane(&pane).await {
                Ok(()) => report.panes_killed += 1,
                Err(e) => report.warnings.push(format!("kill pane {pane} failed: {e}")),
            }
        }

        // 4. Archive swarm state (never delete).
        if let Some(session) = &swarm_session {
            let state_file = self.paths.swarm_state_file(session);
            let archived = state_file.with_extension(format!(
                "state.archived-{}",
                Utc::now().timestamp()
            ));
            if let Err(e) = std::fs::rename(&state_file, &archived) {
                report.warnings.push(format!("archiving swarm state failed: {e}"));
            }
        }

        // 5. Release bindings (removes name files), retire instances.
        for agent in &agents {
            if let Some(pane) = self.identity.pane_for_agent(agent) {
                if let Err(e) = self.identity.release(&pane) {
                    report.warnings.push(format!("releasing binding for {agent} failed: {e}"));
                }
            }
            if let Err(e) = self.registry.unregister(agent) {
                report.warnings.push(format!("unregister {agent} failed: {e}"));
            }
            self.activity.record(ActivityKind::Teardown, agent, serde_json::Value::Null);
        }

        report.duration_secs = started.elapsed().as_secs();
        report.efficiency = match completed + in_progress {
            0 => None,
            total => Some(completed as f64 / total as f64),
        };
        info!(
            agents = report.agents.len(),
            panes = report.panes_killed,
            warnings = report.warnings.len(),
            "teardown complete"
        );
        Ok(report)
    }

    /// `(closed, in_progress)` bead counts owned by the departing agents.
    async fn workload_for(&self, agents: &[String]) -> (usize, usize) {
        let owned = |owner: &Option<String>| {
            owner.as_ref().map(|o| agents.contains(o)).unwrap_or(false)
        };
        let completed = match self.store.list(Some(BeadStatus::Closed)).await {
            Ok(beads) => beads.iter().filter(|b| owned(&b.owner)).count(),
            Err(e) => {
                warn!(error = %e, "could not count closed beads");
                0
            }
        };
        let in_progress = match self.store.list(Some(BeadStatus::InProgress)).await {
            Ok(beads) => beads.iter().filter(|b| owned(&b.owner)).count(),
            Err(e) => {
                warn!(error = %e, "could not count in-progress beads");
                0
            }
        };
        (completed, in_progress)
    }

    async fn held_reservations(&self, agents: &[String]) -> Result<usize, corral_mail::MailError> {
        let slug = self.paths.slug();
        let all = self.mail.list_reservations(&slug).await?;
        Ok(all.iter().filter(|r| agents.contains(&r.agent)).count())
    }

    /// `Some(true)` when the project repo has uncommitted changes; `None`
    /// when git is unavailable (tolerated, logged).
    async fn repo_dirty(&self) -> Option<bool> {
        let output = tokio::process::Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(self.paths.root())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            warn!("git status failed, skipping dirty-repo check");
            return None;
        }
        Some(!output.stdout.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_names_are_unique() {
        let mut names: Vec<&str> = NAME_POOL.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), NAME_POOL.len());
    }

    #[test]
    fn pick_name_skips_used_and_falls_back() {
        let used: Vec<String> = vec!["amber".into(), "basil".into()];
        assert_eq!(pick_name("backend", &used), "cedar");

        let all: Vec<String> = NAME_POOL.iter().map(|s| s.to_string()).collect();
        let generated = pick_name("backend", &all);
        assert!(generated.starts_with("backend-"));
        assert_eq!(generated.len(), "backend-".len() + 6);
    }
}
