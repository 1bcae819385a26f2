//! Control-loop scenarios over the in-memory doubles: threshold breach and
//! recovery, stuck tasks, hung agents, scale-up, and idle teardown.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use corral_core::config::FleetConfig;
use corral_core::paths::ProjectPaths;
use corral_core::types::{ActivityKind, Bead, BeadStatus};
use corral_daemon::daemon::CorralDaemon;
use corral_fleet::registry::Registry;
use corral_mail::testing::RecordingMail;
use corral_mux::testing::FakeMux;
use corral_store::{BeadStore, MemoryStore};

struct World {
    paths: ProjectPaths,
    store: Arc<MemoryStore>,
    mux: Arc<FakeMux>,
    mail: Arc<RecordingMail>,
    daemon: CorralDaemon,
    _dir: tempfile::TempDir,
}

fn world_with(config: FleetConfig) -> World {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    paths.ensure_layout().unwrap();
    let store = Arc::new(MemoryStore::new());
    let mux = Arc::new(FakeMux::new());
    let mail = Arc::new(RecordingMail::new());
    let daemon = CorralDaemon::with_clients(
        paths.clone(),
        config,
        store.clone(),
        mux.clone(),
        mail.clone(),
    );
    World { paths, store, mux, mail, daemon, _dir: dir }
}

fn ready_bead(id: &str, label: &str) -> Bead {
    let mut bead = Bead::new(id, format!("work {id}"));
    bead.labels = vec![label.to_string()];
    bead
}

#[tokio::test]
async fn threshold_breach_then_recovery() {
    // Scenario: depth rises 4 → 22 (high), then falls to 3 (normal).
    let mut config = FleetConfig::default();
    config.scaler.scale_up_ratio = 1000.0; // keep the scaler quiet here
    let w = world_with(config);

    for i in 0..4 {
        w.store.insert(ready_bead(&format!("bd-{i}"), "backend")).await;
    }
    let now = Utc::now();
    let report = w.daemon.monitor().lock().await.tick(now).await.unwrap();
    assert!(!report.breached);
    assert!(!w.paths.queue_alert_flag().exists());

    for i in 4..22 {
        w.store.insert(ready_bead(&format!("bd-{i}"), "backend")).await;
    }
    let report = w.daemon.monitor().lock().await.tick(now).await.unwrap();
    assert!(report.breached);
    assert_eq!(report.level.unwrap().as_str(), "high");
    assert!(w.paths.queue_alert_flag().exists());
    assert_eq!(
        std::fs::read_to_string(w.paths.queue_alert_flag()).unwrap(),
        "high"
    );

    // A second elevated tick is not a new breach.
    let report = w.daemon.monitor().lock().await.tick(now).await.unwrap();
    assert!(!report.breached && !report.recovered);

    // Queue drains to 3 — recovery clears the flag.
    for i in 3..22 {
        w.store.update(&format!("bd-{i}"), Some(BeadStatus::Closed), None).await.unwrap();
    }
    let report = w.daemon.monitor().lock().await.tick(now).await.unwrap();
    assert!(report.recovered);
    assert!(!w.paths.queue_alert_flag().exists());

    // Both edges are in the activity stream.
    let activity = corral_core::activity::ActivityLog::new(&w.paths);
    let kinds: Vec<ActivityKind> = activity.read_all().into_iter().map(|e| e.event).collect();
    assert!(kinds.contains(&ActivityKind::ThresholdBreach));
    assert!(kinds.contains(&ActivityKind::Recovered));
}

#[tokio::test]
async fn stuck_task_raises_flag_and_mail() {
    let w = world_with(FleetConfig::default());

    let mut bead = Bead::new("bd-xyz", "stuck work");
    bead.status = BeadStatus::InProgress;
    bead.owner = Some("amber".into());
    bead.updated_at = Some(Utc::now() - ChronoDuration::hours(3));
    w.store.insert(bead).await;

    // A coordinator must exist to receive the alert; its pane is live so
    // the sweep has no hung agents muddying the flag.
    let registry = Registry::open(w.paths.clone());
    registry.register("sage", "coordinator").unwrap();
    let identity = corral_fleet::identity::IdentityStore::new(w.paths.clone());
    identity.bind("%9", "sage", "coordinator", &[]).unwrap();
    w.mux.add_pane("%9", "main", Some("sage"));

    let report = w
        .daemon
        .monitor()
        .lock()
        .await
        .tick(Utc::now())
        .await
        .unwrap();
    assert_eq!(report.stuck_tasks, vec!["bd-xyz"]);

    let flag = std::fs::read_to_string(w.paths.health_alert_flag()).unwrap();
    assert_eq!(flag, "stuck_tasks|bd-xyz");

    let health_mail: Vec<_> = w
        .mail
        .sent_messages()
        .into_iter()
        .filter(|m| m.subject.contains("[agent-health]"))
        .collect();
    assert_eq!(health_mail.len(), 1);
    assert_eq!(health_mail[0].to, vec!["sage"]);
}

#[tokio::test]
async fn hung_agent_is_detected_when_pane_is_dead() {
    let w = world_with(FleetConfig::default());

    let registry = Registry::open(w.paths.clone());
    registry.register("amber", "backend").unwrap();
    // amber is bound to %1, but %1 is not in the mux listing — no beats.
    let identity = corral_fleet::identity::IdentityStore::new(w.paths.clone());
    identity.bind("%1", "amber", "backend", &[]).unwrap();

    let report = w
        .daemon
        .monitor()
        .lock()
        .await
        .tick(Utc::now())
        .await
        .unwrap();
    assert_eq!(report.hung_agents, vec!["amber"]);
    let flag = std::fs::read_to_string(w.paths.health_alert_flag()).unwrap();
    assert_eq!(flag, "hung_agents|amber");
}

#[tokio::test]
async fn live_agents_beat_and_are_not_hung() {
    let w = world_with(FleetConfig::default());

    let registry = Registry::open(w.paths.clone());
    registry.register("amber", "backend").unwrap();
    let identity = corral_fleet::identity::IdentityStore::new(w.paths.clone());
    identity.bind("%1", "amber", "backend", &[]).unwrap();
    w.mux.add_pane("%1", "main", Some("amber"));

    let report = w
        .daemon
        .monitor()
        .lock()
        .await
        .tick(Utc::now())
        .await
        .unwrap();
    assert!(report.hung_agents.is_empty());
    let beats = corral_core::heartbeat::HeartbeatLog::new(&w.paths).last_beats();
    assert!(beats.contains_key("amber"));
}

#[tokio::test]
async fn idle_agent_with_ready_work_gets_one_nudge() {
    let w = world_with(FleetConfig::default());
    w.store.insert(ready_bead("bd-1", "backend")).await;

    let registry = Registry::open(w.paths.clone());
    registry.register("amber", "backend").unwrap();

    let now = Utc::now();
    let report = w.daemon.monitor().lock().await.tick(now).await.unwrap();
    assert_eq!(report.nudged, vec!["amber"]);

    // Within the cooldown the nudge is not repeated.
    let soon = now + ChronoDuration::minutes(30);
    let report = w.daemon.monitor().lock().await.tick(soon).await.unwrap();
    assert!(report.nudged.is_empty());

    // After the cooldown it may fire again.
    let later = now + ChronoDuration::minutes(61);
    let report = w.daemon.monitor().lock().await.tick(later).await.unwrap();
    assert_eq!(report.nudged, vec!["amber"]);
}

#[tokio::test]
async fn scale_up_spawns_from_pool_and_respects_max() {
    // Scenario: MAX=8, 2 active, 15 ready backend-heavy beads.
    let mut config = FleetConfig::default();
    config.scaler.spawn_delay_ms = 1;
    let w = world_with(config);
    for i in 0..15 {
        w.store.insert(ready_bead(&format!("bd-{i}"), "backend")).await;
    }
    let registry = Registry::open(w.paths.clone());
    registry.register("willow", "general").unwrap();
    registry.register("yarrow", "general").unwrap();

    let report = w.daemon.scaler().tick(Utc::now()).await.unwrap();
    assert_eq!(report.spawned.len(), 3);
    assert_eq!(registry.active().len(), 5);

    // Spawn events were appended per success.
    let activity = corral_core::activity::ActivityLog::new(&w.paths);
    let spawns = activity
        .read_all()
        .into_iter()
        .filter(|e| e.event == ActivityKind::Spawn)
        .count();
    assert_eq!(spawns, 3);

    let analysis = report.analysis.unwrap();
    assert!(analysis.types_needed["backend"] >= 8);
}

#[tokio::test]
async fn idle_teardown_empties_the_fleet_down_to_min() {
    let mut config = FleetConfig::default();
    config.scaler.spawn_delay_ms = 1;
    let w = world_with(config);

    // Spawn three agents through the scaler path so they have panes.
    for i in 0..9 {
        w.store.insert(ready_bead(&format!("bd-{i}"), "backend")).await;
    }
    let now = Utc::now();
    let report = w.daemon.scaler().tick(now).await.unwrap();
    assert_eq!(report.spawned.len(), 1); // depth 9 is in the lowest band
    let registry = Registry::open(w.paths.clone());
    let active_before = registry.active().len();
    assert!(active_before >= 1);

    // Queue drains completely; everyone has been silent past the timeout.
    for i in 0..9 {
        w.store.update(&format!("bd-{i}"), Some(BeadStatus::Closed), None).await.unwrap();
    }
    let later = now + ChronoDuration::hours(2);
    let report = w.daemon.scaler().tick(later).await.unwrap();
    assert_eq!(report.torn_down.len(), active_before);
    assert!(registry.active().is_empty());
    assert_eq!(w.mux.pane_count(), 0);

    // Next tick: nothing to do.
    let report = w.daemon.scaler().tick(later + ChronoDuration::hours(1)).await.unwrap();
    assert!(report.torn_down.is_empty());
    assert!(report.analysis.unwrap().recommendations.is_empty());
}
