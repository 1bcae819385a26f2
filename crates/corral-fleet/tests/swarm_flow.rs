//! Swarm lifecycle over the in-memory doubles: spawn registers agents and
//! records state, teardown releases reservations, notifies, kills panes,
//! and archives the state file.

use std::sync::Arc;
use std::time::Duration;

use corral_core::activity::ActivityLog;
use corral_core::config::ReservationConfig;
use corral_core::paths::ProjectPaths;
use corral_core::types::{ActivityKind, Bead, BeadStatus};
use corral_fleet::identity::IdentityStore;
use corral_fleet::registry::Registry;
use corral_fleet::router::Router;
use corral_fleet::spawner::{Spawner, Teardown, TeardownError, TeardownTarget};
use corral_mail::testing::RecordingMail;
use corral_mux::testing::FakeMux;
use corral_mux::Multiplexer;
use corral_store::MemoryStore;

struct World {
    paths: ProjectPaths,
    registry: Arc<Registry>,
    identity: IdentityStore,
    mux: Arc<FakeMux>,
    mail: Arc<RecordingMail>,
    store: Arc<MemoryStore>,
    _dir: tempfile::TempDir,
}

fn world() -> World {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    paths.ensure_layout().unwrap();
    World {
        registry: Arc::new(Registry::open(paths.clone())),
        identity: IdentityStore::new(paths.clone()),
        mux: Arc::new(FakeMux::new()),
        mail: Arc::new(RecordingMail::new()),
        store: Arc::new(MemoryStore::new()),
        paths,
        _dir: dir,
    }
}

fn spawner(w: &World) -> Spawner {
    Spawner::new(
        w.paths.clone(),
        w.registry.clone(),
        w.identity.clone(),
        w.mux.clone(),
        Duration::from_millis(1),
    )
}

fn teardown(w: &World) -> Teardown {
    let router = Router::new(
        w.paths.clone(),
        w.registry.clone(),
        w.identity.clone(),
        w.mux.clone(),
        w.mail.clone(),
        "SystemNotify",
        None,
    );
    Teardown::new(
        w.paths.clone(),
        w.registry.clone(),
        w.identity.clone(),
        w.mux.clone(),
        w.mail.clone(),
        w.store.clone(),
        router,
        ReservationConfig::default(),
        Duration::ZERO,
    )
}

#[tokio::test]
async fn spawn_registers_binds_and_records_state() {
    let w = world();
    let state = spawner(&w).spawn_swarm(3, "backend", Some("night")).await.unwrap();

    // Names come from the fixed pool, in order.
    let names: Vec<&str> = state.agents.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["amber", "basil", "cedar"]);

    // Registry shows three active agents, each with a live bound pane.
    assert_eq!(w.registry.active().len(), 3);
    assert_eq!(w.mux.pane_count(), 3);
    for agent in &state.agents {
        assert_eq!(w.identity.pane_for_agent(&agent.name).as_deref(), Some(agent.pane_id.as_str()));
        assert!(w.paths.pane_name_file(&agent.pane_id).exists());
    }

    // State file round-trips and a spawn event exists per agent.
    assert!(w.paths.swarm_state_file("night").exists());
    let activity = ActivityLog::new(&w.paths);
    let spawns = activity
        .read_all()
        .into_iter()
        .filter(|e| e.event == ActivityKind::Spawn)
        .count();
    assert_eq!(spawns, 3);
}

#[tokio::test]
async fn spawn_is_idempotent_per_name() {
    let w = world();
    spawner(&w).spawn_swarm(1, "backend", Some("a")).await.unwrap();
    // A second swarm picks fresh names instead of colliding.
    let second = spawner(&w).spawn_swarm(1, "backend", Some("b")).await.unwrap();
    assert_eq!(second.agents[0].name, "basil");
    assert_eq!(w.registry.active().len(), 2);
}

#[tokio::test]
async fn spawn_rejects_unknown_type() {
    let w = world();
    assert!(spawner(&w).spawn_swarm(1, "wizard", None).await.is_err());
}

#[tokio::test]
async fn teardown_cascade_cleans_everything() {
    let w = world();
    let state = spawner(&w).spawn_swarm(2, "backend", Some("night")).await.unwrap();

    // amber holds a reservation and basil queued behind it.
    let slug = w.paths.slug();
    w.mail.hold("amber", &slug, "src/*");

    let report = teardown(&w)
        .run(TeardownTarget::Swarm("night".into()), true)
        .await
        .unwrap();

    assert_eq!(report.agents.len(), 2);
    assert_eq!(report.reservations_released, 1);
    assert_eq!(report.panes_killed, 2);
    assert_eq!(w.mux.pane_count(), 0);
    assert!(w.registry.active().is_empty());

    // State file archived, not deleted.
    assert!(!w.paths.swarm_state_file("night").exists());
    let archived: Vec<_> = std::fs::read_dir(w.paths.pids_dir())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().contains("archived"))
        .collect();
    assert_eq!(archived.len(), 1);

    // Name files removed.
    for agent in &state.agents {
        assert!(!w.paths.pane_name_file(&agent.pane_id).exists());
    }

    // Shutdown notice went out.
    assert!(w
        .mail
        .sent_messages()
        .iter()
        .any(|m| m.subject.contains("[teardown]")));
}

#[tokio::test]
async fn teardown_prechecks_block_in_progress_work() {
    let w = world();
    spawner(&w).spawn_swarm(1, "backend", Some("night")).await.unwrap();

    let mut bead = Bead::new("bd-1", "work");
    bead.status = BeadStatus::InProgress;
    bead.owner = Some("amber".into());
    w.store.insert(bead).await;

    let err = teardown(&w)
        .run(TeardownTarget::Swarm("night".into()), false)
        .await
        .unwrap_err();
    assert!(matches!(err, TeardownError::Blocked { .. }));
    // Nothing was torn down.
    assert_eq!(w.registry.active().len(), 1);
    assert_eq!(w.mux.pane_count(), 1);
}

#[tokio::test]
async fn teardown_by_missing_swarm_id_is_fatal() {
    let w = world();
    let err = teardown(&w)
        .run(TeardownTarget::Swarm("ghost".into()), true)
        .await
        .unwrap_err();
    assert!(matches!(err, TeardownError::StateUnreadable(_)));
}

#[tokio::test]
async fn teardown_single_agent_tolerates_missing_pane() {
    let w = world();
    spawner(&w).spawn_swarm(1, "backend", Some("night")).await.unwrap();
    // Pane vanished out from under us.
    let pane = w.identity.pane_for_agent("amber").unwrap();
    w.mux.kill_pane(&pane).await.unwrap();

    let report = teardown(&w)
        .run(TeardownTarget::Agent("amber".into()), true)
        .await
        .unwrap();
    assert_eq!(report.panes_killed, 0);
    assert!(!report.warnings.is_empty());
    assert!(w.registry.active().is_empty());
}

#[tokio::test]
async fn teardown_reports_efficiency() {
    let w = world();
    spawner(&w).spawn_swarm(1, "backend", Some("night")).await.unwrap();

    let mut done = Bead::new("bd-1", "done");
    done.status = BeadStatus::Closed;
    done.owner = Some("amber".into());
    w.store.insert(done).await;
    let mut wip = Bead::new("bd-2", "wip");
    wip.status = BeadStatus::InProgress;
    wip.owner = Some("amber".into());
    w.store.insert(wip).await;

    let report = teardown(&w)
        .run(TeardownTarget::Swarm("night".into()), true)
        .await
        .unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.in_progress, 1);
    assert!((report.efficiency.unwrap() - 0.5).abs() < f64::EPSILON);
}
