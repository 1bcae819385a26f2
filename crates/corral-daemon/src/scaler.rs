//! Auto-scaler: executes the queue analyzer's recommendations.
//!
//! Scale-ups run before idle checks and never push the fleet past
//! `max_agents`; idle teardown never pulls it under `min_agents`. Both are
//! idempotent per agent name.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use corral_core::activity::ActivityLog;
use corral_core::config::ScalerConfig;
use corral_core::paths::ProjectPaths;
use corral_core::types::{ActivityKind, BeadStatus};
use corral_fleet::analyzer::{self, QueueAnalysis, Recommendation};
use corral_fleet::registry::Registry;
use corral_fleet::spawner::{Spawner, Teardown, TeardownTarget};
use corral_fleet::tracker::PerformanceTracker;
use corral_store::BeadStore;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct ScaleReport {
    pub analysis: Option<QueueAnalysis>,
    pub spawned: Vec<String>,
    pub torn_down: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct AutoScaler {
    paths: ProjectPaths,
    config: ScalerConfig,
    store: Arc<dyn BeadStore>,
    registry: Arc<Registry>,
    tracker: PerformanceTracker,
    spawner: Spawner,
    teardown: Teardown,
    activity: ActivityLog,
}

impl AutoScaler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        paths: ProjectPaths,
        config: ScalerConfig,
        store: Arc<dyn BeadStore>,
        registry: Arc<Registry>,
        spawner: Spawner,
        teardown: Teardown,
    ) -> Self {
        let tracker = PerformanceTracker::new(paths.clone());
        let activity = ActivityLog::new(&paths);
        Self { paths, config, store, registry, tracker, spawner, teardown, activity }
    }

    /// Compute the current analysis without acting on it.
    pub async fn analyze(&self) -> Result<QueueAnalysis> {
        let ready = self.store.ready().await.context("bead store unreachable")?;
        let active = self.registry.active().len();
        let stats = self.tracker.lifecycle_stats();
        Ok(analyzer::analyze(&ready, active, &self.config, Some(&stats)))
    }

    /// One scaler tick: analyze, then execute scale-up first, check-idle
    /// second.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<ScaleReport> {
        let analysis = self.analyze().await?;
        let mut report = ScaleReport::default();

        for recommendation in &analysis.recommendations {
            match recommendation {
                Recommendation::ScaleUp { count, agent_type } => {
                    self.scale_up(*count, agent_type, now, &mut report).await;
                }
                Recommendation::CheckIdle => {
                    self.check_idle(now, &mut report).await;
                }
                Recommendation::Warning { message } => {
                    warn!(message = %message, "analyzer warning");
                    report.warnings.push(message.clone());
                }
            }
        }

        info!(
            ready = analysis.ready_tasks,
            active = analysis.active_agents,
            spawned = report.spawned.len(),
            torn_down = report.torn_down.len(),
            "scaler tick"
        );
        report.analysis = Some(analysis);
        Ok(report)
    }

    /// Spawn up to `count` agents, clamped so the fleet never exceeds
    /// `max_agents`.
    pub async fn scale_up(
        &self,
        count: usize,
        agent_type: &str,
        now: DateTime<Utc>,
        report: &mut ScaleReport,
    ) {
        let active = self.registry.active().len();
        let room = self.config.max_agents.saturating_sub(active);
        let allowed = count.min(room);
        if allowed < count {
            let msg = format!(
                "capacity limits scale-up to {allowed} of {count} (active {active}, max {})",
                self.config.max_agents
            );
            warn!("{msg}");
            report.warnings.push(msg);
        }
        if allowed == 0 {
            return;
        }
        let session = format!("scale-{agent_type}-{}", now.timestamp());
        match self
            .spawner
            .spawn_swarm(allowed as u32, agent_type, Some(&session))
            .await
        {
            Ok(state) => {
                report
                    .spawned
                    .extend(state.agents.into_iter().map(|a| a.name));
            }
            Err(e) => {
                warn!(error = %e, "scale-up spawn failed");
                report.warnings.push(format!("spawn failed: {e}"));
            }
        }
    }

    /// Tear down agents idle past the timeout, never dropping below
    /// `min_agents`. Oldest idle goes first.
    pub async fn check_idle(&self, now: DateTime<Utc>, report: &mut ScaleReport) {
        let active = self.registry.active();
        let last_seen = self.activity.last_event_per_agent();

        let mut idle: Vec<(String, DateTime<Utc>)> = active
            .iter()
            .filter_map(|instance| {
                let seen = last_seen
                    .get(&instance.name)
                    .copied()
                    .unwrap_or(instance.registered_at);
                let idle_for = (now - seen).num_seconds();
                (idle_for > self.config.idle_timeout_secs as i64)
                    .then(|| (instance.name.clone(), seen))
            })
            .collect();
        idle.sort_by_key(|(_, seen)| *seen);

        // Agents that still own in-flight work are not idle, whatever the
        // event log says.
        let owners: HashSet<String> = match self.store.list(Some(BeadStatus::InProgress)).await {
            Ok(beads) => beads.into_iter().filter_map(|b| b.owner).collect(),
            Err(e) => {
                warn!(error = %e, "skipping in-progress ownership check");
                HashSet::new()
            }
        };

        for (agent, seen) in idle {
            if self.registry.active().len() <= self.config.min_agents {
                break;
            }
            if owners.contains(&agent) {
                warn!(agent = %agent, "idle by events but owns in-progress work, skipping");
                continue;
            }
            self.activity.record(
                ActivityKind::Idle,
                &agent,
                json!({ "idle_secs": (now - seen).num_seconds() }),
            );
            match self
                .teardown
                .run(TeardownTarget::Agent(agent.clone()), true)
                .await
            {
                Ok(_) => report.torn_down.push(agent),
                Err(e) => {
                    warn!(agent = %agent, error = %e, "idle teardown failed");
                    report.warnings.push(format!("teardown {agent} failed: {e}"));
                }
            }
        }
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }
}
