//! In-memory mail service double: records every call and models the
//! reservation table well enough to exercise conflict and release flows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use corral_core::types::Reservation;

use crate::rpc::{
    ConflictHolder, Importance, InboxMessage, MailTransport, ReleaseSpec, ReserveOutcome, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub project_key: String,
    pub sender: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub importance: Importance,
}

#[derive(Default)]
pub struct RecordingMail {
    pub sent: Mutex<Vec<SentMessage>>,
    pub registered: Mutex<Vec<(String, String)>>,
    pub projects: Mutex<Vec<String>>,
    reservations: Mutex<Vec<Reservation>>,
    next_id: AtomicU64,
}

impl RecordingMail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a reservation held by `agent` (TTL 30 min).
    pub fn hold(&self, agent: &str, slug: &str, pattern: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.reservations.lock().unwrap().push(Reservation {
            id,
            agent: agent.into(),
            project_slug: slug.into(),
            path_pattern: pattern.into(),
            exclusive: true,
            expires_at: Utc::now() + ChronoDuration::minutes(30),
        });
        id
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.lock().unwrap().len()
    }
}

#[async_trait]
impl MailTransport for RecordingMail {
    async fn ensure_project(&self, project_key: &str) -> Result<()> {
        let mut projects = self.projects.lock().unwrap();
        if !projects.iter().any(|p| p == project_key) {
            projects.push(project_key.to_string());
        }
        Ok(())
    }

    async fn register_agent(&self, project_key: &str, name: &str) -> Result<()> {
        let mut registered = self.registered.lock().unwrap();
        let entry = (project_key.to_string(), name.to_string());
        if !registered.contains(&entry) {
            registered.push(entry);
        }
        Ok(())
    }

    async fn send_message(
        &self,
        project_key: &str,
        sender: &str,
        to: &[String],
        subject: &str,
        body: &str,
        importance: Importance,
    ) -> Result<()> {
        self.sent.lock().unwrap().push(SentMessage {
            project_key: project_key.into(),
            sender: sender.into(),
            to: to.to_vec(),
            subject: subject.into(),
            body: body.into(),
            importance,
        });
        Ok(())
    }

    async fn fetch_inbox(
        &self,
        _project_key: &str,
        agent: &str,
        limit: usize,
    ) -> Result<Vec<InboxMessage>> {
        let sent = self.sent.lock().unwrap();
        Ok(sent
            .iter()
            .enumerate()
            .filter(|(_, m)| m.to.iter().any(|t| t == agent))
            .take(limit)
            .map(|(i, m)| InboxMessage {
                id: i as u64 + 1,
                from: m.sender.clone(),
                subject: m.subject.clone(),
                body: m.body.clone(),
                importance: m.importance,
                created_at: Utc::now(),
            })
            .collect())
    }

    async fn fetch_inbox_product(
        &self,
        _product_uid: &str,
        agent: &str,
        limit: usize,
    ) -> Result<Vec<InboxMessage>> {
        self.fetch_inbox("", agent, limit).await
    }

    async fn delete_messages(&self, _project_key: &str, _agent: &str, _ids: &[u64]) -> Result<()> {
        Ok(())
    }

    async fn reserve_paths(
        &self,
        project_key: &str,
        agent: &str,
        paths: &[String],
        ttl_secs: u64,
        exclusive: bool,
        _reason: &str,
    ) -> Result<ReserveOutcome> {
        let slug = corral_core::paths::project_slug(std::path::Path::new(project_key));
        let mut table = self.reservations.lock().unwrap();

        // Exclusive reservations by other agents conflict on prefix overlap.
        let conflicts: Vec<ConflictHolder> = table
            .iter()
            .filter(|r| r.agent != agent && r.exclusive)
            .filter(|r| {
                paths.iter().any(|p| {
                    crate::reservation::patterns_overlap(&r.path_pattern, p, &slug)
                })
            })
            .map(|r| ConflictHolder {
                holder: r.agent.clone(),
                path_pattern: r.path_pattern.clone(),
                reservation_id: Some(r.id),
            })
            .collect();
        if !conflicts.is_empty() {
            return Ok(ReserveOutcome { granted: Vec::new(), conflicts });
        }

        let mut granted = Vec::new();
        for path in paths {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let reservation = Reservation {
                id,
                agent: agent.into(),
                project_slug: slug.clone(),
                path_pattern: path.clone(),
                exclusive,
                expires_at: Utc::now() + ChronoDuration::seconds(ttl_secs as i64),
            };
            table.push(reservation.clone());
            granted.push(reservation);
        }
        Ok(ReserveOutcome { granted, conflicts: Vec::new() })
    }

    async fn release_reservations(
        &self,
        _project_key: &str,
        agent: &str,
        spec: &ReleaseSpec,
    ) -> Result<Vec<Reservation>> {
        let mut table = self.reservations.lock().unwrap();
        let matches = |r: &Reservation| {
            r.agent == agent
                && match spec {
                    ReleaseSpec::Paths(paths) => paths.contains(&r.path_pattern),
                    ReleaseSpec::Ids(ids) => ids.contains(&r.id),
                    ReleaseSpec::All => true,
                }
        };
        let released: Vec<Reservation> = table.iter().filter(|r| matches(r)).cloned().collect();
        table.retain(|r| !matches(r));
        Ok(released)
    }

    async fn renew_reservations(
        &self,
        _project_key: &str,
        agent: &str,
        extend_secs: u64,
    ) -> Result<Vec<Reservation>> {
        let mut table = self.reservations.lock().unwrap();
        let mut renewed = Vec::new();
        for r in table.iter_mut().filter(|r| r.agent == agent) {
            r.expires_at += ChronoDuration::seconds(extend_secs as i64);
            renewed.push(r.clone());
        }
        Ok(renewed)
    }

    async fn list_reservations(&self, project_slug: &str) -> Result<Vec<Reservation>> {
        Ok(self
            .reservations
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.project_slug == project_slug)
            .cloned()
            .collect())
    }

    async fn list_product_reservations(&self, _product_uid: &str) -> Result<Vec<Reservation>> {
        Ok(self.reservations.lock().unwrap().clone())
    }
}
