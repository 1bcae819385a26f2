//! End-to-end reservation flows over the in-memory service double:
//! cross-agent conflict with pending-requester queueing, release draining
//! the queue exactly once, self-conflict handling, and renew monotonicity.

use std::sync::Arc;

use corral_core::config::ReservationConfig;
use corral_core::paths::{project_slug, ProjectPaths};
use corral_core::types::PendingRequesters;
use corral_mail::reservation::{pending_key, ReservationClient};
use corral_mail::testing::RecordingMail;
use corral_mail::{ReleaseSpec, ReservationError};

fn client_for(
    mail: &Arc<RecordingMail>,
    paths: &ProjectPaths,
    agent: &str,
    auto_release: bool,
) -> ReservationClient {
    let config = ReservationConfig {
        auto_release_own_stale: auto_release,
        ..ReservationConfig::default()
    };
    ReservationClient::new(mail.clone(), paths.clone(), config, agent, None)
}

#[tokio::test]
async fn conflict_queues_requester_and_release_drains_it() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    paths.ensure_layout().unwrap();
    let slug = project_slug(dir.path());

    let mail = Arc::new(RecordingMail::new());
    mail.hold("amber", &slug, "src/*");

    // Agent basil tries to reserve an overlapping path — cross-agent conflict.
    let basil = client_for(&mail, &paths, "basil", false);
    let err = basil
        .reserve(&["src/app.ts".into()], None, true, "refactor login")
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::CrossAgentConflict { .. }));

    // Holder amber got a coordination mail.
    let sent = mail.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["amber"]);
    assert!(sent[0].subject.contains("reservation-conflict"));

    // Pending file keyed by md5(holder|path)[:12] contains basil.
    let key = pending_key("amber", "src/*");
    let pending_file = paths.pending_file(&key);
    let pending: PendingRequesters =
        serde_json::from_str(&std::fs::read_to_string(&pending_file).unwrap()).unwrap();
    assert_eq!(pending.holder, "amber");
    assert_eq!(pending.requesters, vec!["basil"]);

    // A second identical attempt does not duplicate the queue entry.
    let _ = basil
        .reserve(&["src/app.ts".into()], None, true, "retry")
        .await
        .unwrap_err();
    let pending: PendingRequesters =
        serde_json::from_str(&std::fs::read_to_string(&pending_file).unwrap()).unwrap();
    assert_eq!(pending.requesters, vec!["basil"]);

    // Amber releases src/* — basil is notified exactly once, file removed.
    let amber = client_for(&mail, &paths, "amber", false);
    let report = amber
        .release(ReleaseSpec::Paths(vec!["src/*".into()]))
        .await
        .unwrap();
    assert_eq!(report.released.len(), 1);
    assert_eq!(report.notified, vec!["basil"]);
    assert!(!pending_file.exists());

    let released_mail = mail
        .sent_messages()
        .into_iter()
        .filter(|m| m.subject.contains("reservation-released"))
        .collect::<Vec<_>>();
    assert_eq!(released_mail.len(), 1);
    assert_eq!(released_mail[0].to, vec!["basil"]);

    // Releasing again drains nothing further.
    let report = amber.release(ReleaseSpec::All).await.unwrap();
    assert!(report.released.is_empty());
    assert!(report.notified.is_empty());
}

#[tokio::test]
async fn reserve_then_release_restores_state() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    paths.ensure_layout().unwrap();

    let mail = Arc::new(RecordingMail::new());
    let amber = client_for(&mail, &paths, "amber", false);

    let report = amber
        .reserve(&["src/lib.rs".into()], Some(600), true, "edit")
        .await
        .unwrap();
    assert_eq!(report.granted.len(), 1);
    assert_eq!(amber.list().await.unwrap().len(), 1);

    amber
        .release(ReleaseSpec::Paths(vec!["src/lib.rs".into()]))
        .await
        .unwrap();
    assert!(amber.list().await.unwrap().is_empty());
    assert_eq!(mail.reservation_count(), 0);
}

#[tokio::test]
async fn self_conflict_without_auto_release_is_exit_6_path() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    paths.ensure_layout().unwrap();

    let mail = Arc::new(RecordingMail::new());
    let amber = client_for(&mail, &paths, "amber", false);
    amber
        .reserve(&["src/*".into()], None, true, "first")
        .await
        .unwrap();

    let err = amber
        .reserve(&["src/app.ts".into()], None, true, "second")
        .await
        .unwrap_err();
    match err {
        ReservationError::SelfConflict { ids, patterns } => {
            assert_eq!(ids.len(), 1);
            assert_eq!(patterns, vec!["src/*"]);
        }
        other => panic!("expected self conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn self_conflict_with_auto_release_proceeds() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    paths.ensure_layout().unwrap();

    let mail = Arc::new(RecordingMail::new());
    let amber = client_for(&mail, &paths, "amber", true);
    amber.reserve(&["src/*".into()], None, true, "first").await.unwrap();

    let report = amber
        .reserve(&["src/app.ts".into()], None, true, "second")
        .await
        .unwrap();
    assert_eq!(report.auto_released.len(), 1);
    assert_eq!(report.granted.len(), 1);
    // Only the new reservation remains.
    assert_eq!(amber.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn renew_never_decreases_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    paths.ensure_layout().unwrap();

    let mail = Arc::new(RecordingMail::new());
    let amber = client_for(&mail, &paths, "amber", false);
    let report = amber
        .reserve(&["src/lib.rs".into()], Some(600), true, "edit")
        .await
        .unwrap();
    let before = report.granted[0].expires_at;

    let renewed = amber.renew(Some(300)).await.unwrap();
    assert_eq!(renewed.len(), 1);
    assert!(renewed[0].expires_at >= before);

    let renewed_again = amber.renew(Some(300)).await.unwrap();
    assert!(renewed_again[0].expires_at >= renewed[0].expires_at);
}

#[tokio::test]
async fn warn_expiring_lists_short_ttls_only() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    paths.ensure_layout().unwrap();

    let mail = Arc::new(RecordingMail::new());
    let amber = client_for(&mail, &paths, "amber", false);
    // 10 minutes remaining — inside the 15 minute warn threshold.
    amber.reserve(&["a.rs".into()], Some(600), true, "short").await.unwrap();
    // 2 hours remaining — outside.
    amber.reserve(&["b.rs".into()], Some(7200), true, "long").await.unwrap();

    let expiring = amber.warn_expiring().await.unwrap();
    assert_eq!(expiring.len(), 1);
    assert_eq!(expiring[0].path_pattern, "a.rs");
}

#[tokio::test]
async fn bypass_skips_the_service() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    paths.ensure_layout().unwrap();

    let mail = Arc::new(RecordingMail::new());
    let config = ReservationConfig { bypass: true, ..ReservationConfig::default() };
    let amber = ReservationClient::new(mail.clone(), paths.clone(), config, "amber", None);

    let report = amber.reserve(&["src/*".into()], None, true, "r").await.unwrap();
    assert!(report.bypassed);
    assert_eq!(mail.reservation_count(), 0);
}
