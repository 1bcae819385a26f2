//! Queue & health monitor.
//!
//! Each tick polls queue depth, maintains the alert flag across the
//! normal/elevated edge, heartbeats every active agent, and periodically
//! sweeps for stuck tasks and hung agents. Idle agents with work waiting
//! get a one-off nudge with a per-agent cooldown. Monitor state is durable
//! under `pids/queue-monitor.pid` and restart-safe: the alert edge and
//! nudge cooldowns are rebuilt from on-disk state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use corral_core::activity::ActivityLog;
use corral_core::config::MonitorConfig;
use corral_core::fsutil;
use corral_core::heartbeat::HeartbeatLog;
use corral_core::paths::ProjectPaths;
use corral_core::types::{ActivityKind, BeadStatus, QueueLevel};
use corral_fleet::identity::IdentityStore;
use corral_fleet::registry::Registry;
use corral_fleet::router::{DeliveryMode, Router};
use corral_fleet::tracker::PerformanceTracker;
use corral_mux::Multiplexer;
use corral_store::BeadStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Durable state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorState {
    pub pid: u32,
    /// Command signature for PID-reuse detection.
    pub command: String,
    pub last_tick: DateTime<Utc>,
}

impl MonitorState {
    pub fn read(paths: &ProjectPaths) -> Option<Self> {
        fsutil::read_json(&paths.monitor_state_file())
    }

    pub fn is_live(&self) -> bool {
        corral_core::pidfile::PidRecord {
            pid: self.pid,
            command: self.command.clone(),
            started_at: self.last_tick,
        }
        .is_live()
    }
}

/// One queue event line in `.beads/queue-events.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueEvent {
    timestamp: DateTime<Utc>,
    kind: String,
    level: QueueLevel,
    depth: u64,
}

// ---------------------------------------------------------------------------
// TickReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub depth: u64,
    pub level: Option<QueueLevel>,
    pub breached: bool,
    pub recovered: bool,
    pub stuck_tasks: Vec<String>,
    pub hung_agents: Vec<String>,
    pub nudged: Vec<String>,
}

// ---------------------------------------------------------------------------
// QueueMonitor
// ---------------------------------------------------------------------------

pub struct QueueMonitor {
    paths: ProjectPaths,
    config: MonitorConfig,
    store: Arc<dyn BeadStore>,
    registry: Arc<Registry>,
    identity: IdentityStore,
    mux: Arc<dyn Multiplexer>,
    tracker: PerformanceTracker,
    heartbeats: HeartbeatLog,
    activity: ActivityLog,
    router: Router,
    prev_level: QueueLevel,
    last_health_check: Option<DateTime<Utc>>,
    nudge_sent: HashMap<String, DateTime<Utc>>,
}

impl QueueMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        paths: ProjectPaths,
        config: MonitorConfig,
        store: Arc<dyn BeadStore>,
        registry: Arc<Registry>,
        identity: IdentityStore,
        mux: Arc<dyn Multiplexer>,
        router: Router,
    ) -> Self {
        // Restart safety: an existing alert flag means the last incarnation
        // saw an elevated queue, so the recovery edge still fires.
        let prev_level = std::fs::read_to_string(paths.queue_alert_flag())
            .ok()
            .and_then(|text| text.trim().parse::<QueueLevel>().ok())
            .unwrap_or(QueueLevel::Normal);

        // Rebuild nudge cooldowns from recorded notifications.
        let activity = ActivityLog::new(&paths);
        let mut nudge_sent = HashMap::new();
        for event in activity.read_all() {
            if event.event == ActivityKind::NotificationSent
                && event.payload.get("kind").and_then(|v| v.as_str()) == Some("nudge")
            {
                if let Some(agent) = event.agent {
                    let entry = nudge_sent.entry(agent).or_insert(event.timestamp);
                    if event.timestamp > *entry {
                        *entry = event.timestamp;
                    }
                }
            }
        }

        Self {
            tracker: PerformanceTracker::new(paths.clone()),
            heartbeats: HeartbeatLog::new(&paths),
            activity,
            paths,
            config,
            store,
            registry,
            identity,
            mux,
            router,
            prev_level,
            last_health_check: None,
            nudge_sent,
        }
    }

    /// One monitor tick at `now`. The bead store being unreachable is the
    /// one fatal condition — everything downstream degrades per-step.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickReport> {
        let ready = self.store.ready().await.context("bead store unreachable")?;
        let depth = ready.len() as u64;
        let mut report = TickReport { depth, ..TickReport::default() };

        self.check_thresholds(depth, now, &mut report).await;

        // Heartbeats for active agents whose bound pane is actually live —
        // a dead pane must stop beating so hung detection can fire. A mux
        // outage skips the update rather than faking silence.
        let active: Vec<String> = self.registry.active().into_iter().map(|i| i.name).collect();
        match self.mux.list_panes().await {
            Ok(live) => {
                let live_bound = self.identity.live_agents(&live);
                let beating: Vec<String> = active
                    .iter()
                    .filter(|a| live_bound.contains(a))
                    .cloned()
                    .collect();
                self.heartbeats.beat_all(&beating);
            }
            Err(e) => warn!(error = %e, "multiplexer unavailable, skipping heartbeat update"),
        }

        let health_due = match self.last_health_check {
            None => true,
            Some(last) => {
                (now - last).num_seconds() >= self.config.health_check_interval_secs as i64
            }
        };
        if health_due {
            self.last_health_check = Some(now);
            self.health_check(&active, now, &mut report).await;
        }

        if !ready.is_empty() {
            self.nudge_idle(&active, ready.len(), now, &mut report).await;
        }

        let state = MonitorState {
            pid: std::process::id(),
            command: "corral-daemon".into(),
            last_tick: now,
        };
        if let Err(e) = fsutil::atomic_write_json(&self.paths.monitor_state_file(), &state) {
            warn!(error = %e, "failed to persist monitor state");
        }

        info!(
            depth,
            level = %report.level.unwrap_or(QueueLevel::Normal),
            stuck = report.stuck_tasks.len(),
            hung = report.hung_agents.len(),
            nudged = report.nudged.len(),
            "monitor tick"
        );
        Ok(report)
    }

    // -- queue thresholds --

    async fn check_thresholds(&mut self, depth: u64, now: DateTime<Utc>, report: &mut TickReport) {
        let t = &self.config.thresholds;
        let level = QueueLevel::classify(depth, t.low, t.medium, t.high, t.critical);
        report.level = Some(level);

        if self.prev_level == QueueLevel::Normal && level > QueueLevel::Normal {
            report.breached = true;
            self.queue_event("threshold_breach", level, depth, now);
            self.activity.record_system(
                ActivityKind::ThresholdBreach,
                json!({ "level": level.as_str(), "depth": depth }),
            );
            if let Err(e) =
                fsutil::atomic_write_string(&self.paths.queue_alert_flag(), level.as_str())
            {
                warn!(error = %e, "failed to write queue alert flag");
            }
            let tag = (level == QueueLevel::Critical).then_some("URGENT");
            self.notify_coordinators(
                &format!("[queue-alert] depth {depth} ({level})"),
                &format!("ready queue climbed to {depth} ({level})"),
                tag,
            )
            .await;
        } else if self.prev_level > QueueLevel::Normal && level == QueueLevel::Normal {
            report.recovered = true;
            self.queue_event("recovered", level, depth, now);
            self.activity.record_system(
                ActivityKind::Recovered,
                json!({ "level": level.as_str(), "depth": depth }),
            );
            let _ = std::fs::remove_file(self.paths.queue_alert_flag());
        }
        self.prev_level = level;
    }

    fn queue_event(&self, kind: &str, level: QueueLevel, depth: u64, now: DateTime<Utc>) {
        let event = QueueEvent { timestamp: now, kind: kind.into(), level, depth };
        if let Err(e) = fsutil::append_jsonl(&self.paths.queue_events_log(), &event) {
            warn!(error = %e, "failed to append queue event");
        }
    }

    // -- stuck tasks & hung agents --

    async fn health_check(
        &mut self,
        active: &[String],
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        // Stuck: in-progress beads that have not been touched within the
        // threshold. Beads with no update timestamp cannot be judged.
        match self.store.list(Some(BeadStatus::InProgress)).await {
            Ok(beads) => {
                let threshold = self.config.stuck_task_threshold_secs as i64;
                let stuck: Vec<String> = beads
                    .iter()
                    .filter(|b| {
                        b.updated_at
                            .map(|ts| (now - ts).num_seconds() > threshold)
                            .unwrap_or(false)
                    })
                    .map(|b| b.id.clone())
                    .collect();
                if !stuck.is_empty() {
                    self.activity
                        .record_system(ActivityKind::StuckTasks, json!({ "ids": stuck }));
                    self.write_health_flag("stuck_tasks", &stuck);
                    self.notify_coordinators(
                        "[agent-health] stuck tasks",
                        &format!("in-progress beads with no update: {}", stuck.join(", ")),
                        None,
                    )
                    .await;
                    report.stuck_tasks = stuck;
                }
            }
            Err(e) => warn!(error = %e, "stuck-task sweep skipped"),
        }

        // Hung: active agents with no heartbeat inside the threshold.
        let hung = self.heartbeats.hung_agents(
            active,
            Duration::from_secs(self.config.hung_agent_threshold_secs),
            now,
        );
        if !hung.is_empty() {
            self.activity
                .record_system(ActivityKind::HungAgents, json!({ "agents": hung }));
            self.write_health_flag("hung_agents", &hung);
            self.notify_coordinators(
                "[agent-health] hung agents",
                &format!("no heartbeat from: {}", hung.join(", ")),
                None,
            )
            .await;
            report.hung_agents = hung;
        }
    }

    /// Flag format `kind|item1,item2` — consumed by external auto-restart.
    fn write_health_flag(&self, kind: &str, items: &[String]) {
        let content = format!("{kind}|{}", items.join(","));
        if let Err(e) = fsutil::atomic_write_string(&self.paths.health_alert_flag(), &content) {
            warn!(error = %e, "failed to write health alert flag");
        }
    }

    // -- idle nudges --

    async fn nudge_idle(
        &mut self,
        active: &[String],
        ready_count: usize,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let busy = self.tracker.agents_with_active_tasks();
        let cooldown = self.config.nudge_cooldown_secs as i64;
        for agent in active {
            if busy.contains(agent) {
                continue;
            }
            if let Some(last) = self.nudge_sent.get(agent) {
                if (now - *last).num_seconds() < cooldown {
                    continue;
                }
            }
            let subject = format!("[nudge] {ready_count} bead(s) ready");
            let body = "the queue has ready work and you have no active task — \
                        pick one up with `br ready`";
            match self
                .router
                .send(agent, &subject, body, DeliveryMode::Both, None, false)
                .await
            {
                Ok(outcome) if outcome.success => {
                    self.activity.record(
                        ActivityKind::NotificationSent,
                        agent,
                        json!({ "kind": "nudge" }),
                    );
                    self.nudge_sent.insert(agent.clone(), now);
                    report.nudged.push(agent.clone());
                }
                Ok(_) => warn!(agent = %agent, "nudge delivery failed on all channels"),
                Err(e) => warn!(agent = %agent, error = %e, "nudge failed"),
            }
        }
    }

    // -- coordinator notifications --

    async fn notify_coordinators(&self, subject: &str, body: &str, tag: Option<&str>) {
        if !self.config.notify_coordinators {
            return;
        }
        match self
            .router
            .send(
                &self.config.coordinator_recipient,
                subject,
                body,
                DeliveryMode::Both,
                tag,
                false,
            )
            .await
        {
            Ok(_) => {
                self.activity.record_system(
                    ActivityKind::NotificationSent,
                    json!({ "kind": "coordinator", "subject": subject }),
                );
            }
            Err(e) => warn!(error = %e, "coordinator notification failed"),
        }
    }
}
