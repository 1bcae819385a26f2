//! Advisory file reservation client.
//!
//! Reservations never enforce mutual exclusion — their value is fast
//! conflict notification and a predictable queueing discipline. On a
//! cross-agent conflict every unique holder gets a coordination mail and
//! the requester is queued in a pending file keyed by
//! `md5(holder|path)[:12]`; releasing a path drains every overlapping
//! pending entry exactly once.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use corral_core::config::ReservationConfig;
use corral_core::fsutil;
use corral_core::paths::{project_slug, ProjectPaths};
use corral_core::types::{PendingRequesters, Reservation};
use md5::{Digest, Md5};
use tracing::{debug, info, warn};

use crate::rpc::{ConflictHolder, Importance, MailError, MailTransport, ReleaseSpec};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    /// Another agent holds an overlapping reservation. Exit code 5.
    #[error("cross-agent reservation conflict ({} holder(s))", conflicts.len())]
    CrossAgentConflict { conflicts: Vec<ConflictHolder> },
    /// The caller already holds an overlapping reservation. Exit code 6.
    #[error("self-conflict with existing reservation(s) {ids:?}")]
    SelfConflict { ids: Vec<u64>, patterns: Vec<String> },
    #[error(transparent)]
    Mail(#[from] MailError),
    #[error("pending-requester file error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReservationError>;

// ---------------------------------------------------------------------------
// Pattern overlap
// ---------------------------------------------------------------------------

/// Split an optional `repo:` qualifier off a pattern. A qualifier is a
/// leading segment before `:` that contains no `/`; `*` is the wildcard
/// repo.
fn split_repo(pattern: &str) -> (Option<&str>, &str) {
    match pattern.split_once(':') {
        Some((repo, rest)) if !repo.is_empty() && !repo.contains('/') => (Some(repo), rest),
        _ => (None, pattern),
    }
}

/// Prefix-based path overlap: equal, or one is a prefix of the other
/// (trailing `*` globs compare by their literal prefix).
fn path_overlap(a: &str, b: &str) -> bool {
    let a = a.trim_end_matches('*');
    let b = b.trim_end_matches('*');
    a == b || a.starts_with(b) || b.starts_with(a)
}

/// Whether two patterns conflict, normalizing unqualified patterns onto
/// `default_repo`.
pub fn patterns_overlap(a: &str, b: &str, default_repo: &str) -> bool {
    patterns_overlap_in(a, default_repo, b, default_repo)
}

/// Cross-repo form: each unqualified pattern normalizes onto the repo it
/// was declared in.
pub fn patterns_overlap_in(a: &str, repo_of_a: &str, b: &str, repo_of_b: &str) -> bool {
    let (repo_a, path_a) = split_repo(a);
    let (repo_b, path_b) = split_repo(b);
    let repo_a = repo_a.unwrap_or(repo_of_a);
    let repo_b = repo_b.unwrap_or(repo_of_b);
    let repo_ok = repo_a == "*" || repo_b == "*" || repo_a == repo_b;
    repo_ok && path_overlap(path_a, path_b)
}

/// Pending-file key: first 12 hex chars of `md5(holder|path)`.
pub fn pending_key(holder: &str, path_pattern: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(holder.as_bytes());
    hasher.update(b"|");
    hasher.update(path_pattern.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..12].to_string()
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ReserveReport {
    pub granted: Vec<Reservation>,
    /// True when BYPASS_RESERVATION short-circuited the service.
    pub bypassed: bool,
    /// Own overlapping reservation ids auto-released before reserving.
    pub auto_released: Vec<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ReleaseReport {
    pub released: Vec<Reservation>,
    /// Requesters notified while draining pending entries.
    pub notified: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// Nobody holds the path — reserve it directly.
    Free,
    /// Held; holders were notified and the caller queued.
    Held { holders: Vec<String> },
}

// ---------------------------------------------------------------------------
// ReservationClient
// ---------------------------------------------------------------------------

pub struct ReservationClient {
    transport: Arc<dyn MailTransport>,
    paths: ProjectPaths,
    config: ReservationConfig,
    agent: String,
    project_key: String,
}

impl ReservationClient {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        paths: ProjectPaths,
        config: ReservationConfig,
        agent: impl Into<String>,
        project_key: Option<String>,
    ) -> Self {
        let project_key =
            project_key.unwrap_or_else(|| paths.root().to_string_lossy().into_owned());
        Self {
            transport,
            paths,
            config,
            agent: agent.into(),
            project_key,
        }
    }

    fn slug(&self) -> String {
        project_slug(std::path::Path::new(&self.project_key))
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Reservations currently held by this agent.
    pub async fn list(&self) -> Result<Vec<Reservation>> {
        let all = self.transport.list_reservations(&self.slug()).await?;
        Ok(all.into_iter().filter(|r| r.agent == self.agent).collect())
    }

    /// Every reservation in the project.
    pub async fn list_all(&self) -> Result<Vec<Reservation>> {
        Ok(self.transport.list_reservations(&self.slug()).await?)
    }

    /// The caller's reservations whose remaining TTL is inside the warn
    /// threshold.
    pub async fn warn_expiring(&self) -> Result<Vec<Reservation>> {
        let now = Utc::now();
        let warn = self.config.warn_threshold_secs as i64;
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.remaining_secs(now) <= warn)
            .collect())
    }

    /// The reservation set conflicts are checked against: product-wide when
    /// a product marker is present, otherwise project-local.
    async fn conflict_scope(&self) -> Result<Vec<Reservation>> {
        match self.paths.product_uid() {
            Some(uid) => Ok(self.transport.list_product_reservations(&uid).await?),
            None => Ok(self.transport.list_reservations(&self.slug()).await?),
        }
    }

    /// Report holders (other agents) whose reservations overlap any of
    /// `paths`. Advisory only — never blocks.
    pub async fn check(&self, paths: &[String]) -> Result<Vec<ConflictHolder>> {
        let slug = self.slug();
        let scope = self.conflict_scope().await?;
        Ok(scope
            .iter()
            .filter(|r| r.agent != self.agent)
            .filter(|r| {
                paths.iter().any(|p| {
                    patterns_overlap_in(&r.path_pattern, &r.project_slug, p, &slug)
                })
            })
            .map(|r| ConflictHolder {
                holder: r.agent.clone(),
                path_pattern: r.path_pattern.clone(),
                reservation_id: Some(r.id),
            })
            .collect())
    }

    /// Reserve `paths` for `ttl` seconds (`None` ⇒ configured default).
    pub async fn reserve(
        &self,
        paths: &[String],
        ttl_secs: Option<u64>,
        exclusive: bool,
        reason: &str,
    ) -> Result<ReserveReport> {
        if self.config.bypass {
            info!(agent = %self.agent, "BYPASS_RESERVATION set — skipping reservation service");
            return Ok(ReserveReport { bypassed: true, ..ReserveReport::default() });
        }
        let ttl = ttl_secs.unwrap_or(self.config.default_ttl_secs);
        let slug = self.slug();

        // Self-conflict: overlapping patterns we already hold.
        let own = self.list().await?;
        let overlapping: Vec<&Reservation> = own
            .iter()
            .filter(|r| {
                paths
                    .iter()
                    .any(|p| patterns_overlap(&r.path_pattern, p, &slug))
            })
            .collect();
        let mut auto_released = Vec::new();
        if !overlapping.is_empty() {
            let ids: Vec<u64> = overlapping.iter().map(|r| r.id).collect();
            let patterns: Vec<String> =
                overlapping.iter().map(|r| r.path_pattern.clone()).collect();
            if self.config.auto_release_own_stale {
                info!(?ids, "auto-releasing own overlapping reservations");
                self.transport
                    .release_reservations(&self.project_key, &self.agent, &ReleaseSpec::Ids(ids.clone()))
                    .await?;
                auto_released = ids;
            } else {
                return Err(ReservationError::SelfConflict { ids, patterns });
            }
        }

        // Product-level pre-check: cross-repo overlaps the service itself
        // cannot see from a single project's table.
        if self.paths.product_uid().is_some() {
            let conflicts = self.check(paths).await?;
            if !conflicts.is_empty() {
                self.handle_cross_agent(&conflicts, paths, reason).await?;
                return Err(ReservationError::CrossAgentConflict { conflicts });
            }
        }

        let outcome = self
            .transport
            .reserve_paths(&self.project_key, &self.agent, paths, ttl, exclusive, reason)
            .await?;

        if !outcome.conflicts.is_empty() {
            self.handle_cross_agent(&outcome.conflicts, paths, reason).await?;
            return Err(ReservationError::CrossAgentConflict { conflicts: outcome.conflicts });
        }

        debug!(granted = outcome.granted.len(), "reservation granted");
        Ok(ReserveReport { granted: outcome.granted, bypassed: false, auto_released })
    }

    /// Notify each unique holder and queue this agent in the pending files.
    async fn handle_cross_agent(
        &self,
        conflicts: &[ConflictHolder],
        paths: &[String],
        reason: &str,
    ) -> Result<()> {
        let mut seen_holders: Vec<&str> = Vec::new();
        for conflict in conflicts {
            if !seen_holders.contains(&conflict.holder.as_str()) {
                seen_holders.push(&conflict.holder);
                let body = format!(
                    "{agent} needs {paths:?} which overlaps your reservation `{pattern}`.\n\
                     Reason: {reason}\n\
                     You will be notified again when coordination is no longer needed.",
                    agent = self.agent,
                    paths = paths,
                    pattern = conflict.path_pattern,
                );
                if let Err(e) = self
                    .transport
                    .send_message(
                        &self.project_key,
                        &self.agent,
                        std::slice::from_ref(&conflict.holder),
                        &format!("[reservation-conflict] {}", conflict.path_pattern),
                        &body,
                        Importance::Normal,
                    )
                    .await
                {
                    warn!(holder = %conflict.holder, error = %e, "failed to notify holder");
                }
            }
            self.record_pending(&conflict.holder, &conflict.path_pattern)?;
        }
        Ok(())
    }

    /// Add this agent to the pending file for `(holder, path)`.
    fn record_pending(&self, holder: &str, path_pattern: &str) -> Result<()> {
        let key = pending_key(holder, path_pattern);
        let file = self.paths.pending_file(&key);
        let mut pending: PendingRequesters = fsutil::read_json(&file)
            .unwrap_or_else(|| PendingRequesters::new(holder, path_pattern));
        if pending.add(&self.agent) {
            fsutil::atomic_write_json(&file, &pending)?;
            debug!(key = %key, requester = %self.agent, "queued pending requester");
        }
        Ok(())
    }

    /// Ask for a held path without reserving it: notifies the holders and
    /// queues the caller for release notification.
    pub async fn request(&self, path: &str, reason: &str) -> Result<RequestOutcome> {
        let conflicts = self.check(std::slice::from_ref(&path.to_string())).await?;
        if conflicts.is_empty() {
            return Ok(RequestOutcome::Free);
        }
        self.handle_cross_agent(&conflicts, &[path.to_string()], reason).await?;
        let mut holders: Vec<String> = conflicts.into_iter().map(|c| c.holder).collect();
        holders.dedup();
        Ok(RequestOutcome::Held { holders })
    }

    /// Release reservations, then drain every pending entry whose holder is
    /// this agent and whose path overlaps a released path — each recorded
    /// requester is notified exactly once and the entry deleted.
    pub async fn release(&self, spec: ReleaseSpec) -> Result<ReleaseReport> {
        let released = self
            .transport
            .release_reservations(&self.project_key, &self.agent, &spec)
            .await?;

        let released_paths: Vec<String> =
            released.iter().map(|r| r.path_pattern.clone()).collect();
        let notified = self.drain_pending(&released_paths).await?;

        Ok(ReleaseReport { released, notified })
    }

    async fn drain_pending(&self, released_paths: &[String]) -> Result<Vec<String>> {
        let slug = self.slug();
        let mut notified = Vec::new();
        let dir = self.paths.pending_dir();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Ok(notified);
        };
        for entry in entries.flatten() {
            let path: PathBuf = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pending") {
                continue;
            }
            let Some(pending) = fsutil::read_json::<PendingRequesters>(&path) else {
                continue;
            };
            if pending.holder != self.agent {
                continue;
            }
            let overlaps = released_paths
                .iter()
                .any(|p| patterns_overlap(&pending.path_pattern, p, &slug));
            if !overlaps {
                continue;
            }
            for requester in &pending.requesters {
                let body = format!(
                    "{holder} released `{pattern}` — it is available now.",
                    holder = self.agent,
                    pattern = pending.path_pattern,
                );
                match self
                    .transport
                    .send_message(
                        &self.project_key,
                        &self.agent,
                        std::slice::from_ref(requester),
                        &format!("[reservation-released] {}", pending.path_pattern),
                        &body,
                        Importance::Normal,
                    )
                    .await
                {
                    Ok(()) => notified.push(requester.clone()),
                    Err(e) => {
                        warn!(requester = %requester, error = %e, "failed to notify pending requester")
                    }
                }
            }
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove pending file");
            }
            info!(pattern = %pending.path_pattern, count = pending.requesters.len(), "drained pending requesters");
        }
        Ok(notified)
    }

    /// Opportunistically extend every held reservation. A failure is
    /// reported but callers treat it as non-fatal.
    pub async fn renew(&self, extend_secs: Option<u64>) -> Result<Vec<Reservation>> {
        let extend = extend_secs.unwrap_or(self.config.default_ttl_secs);
        let renewed = self
            .transport
            .renew_reservations(&self.project_key, &self.agent, extend)
            .await?;
        Ok(renewed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_patterns_overlap_by_prefix() {
        assert!(patterns_overlap("src/*", "src/app.ts", "proj-a"));
        assert!(patterns_overlap("src/app.ts", "src/*", "proj-a"));
        assert!(patterns_overlap("src/app.ts", "src/app.ts", "proj-a"));
        assert!(!patterns_overlap("src/a.ts", "src/b.ts", "proj-a"));
        assert!(!patterns_overlap("docs/", "src/", "proj-a"));
    }

    #[test]
    fn repo_qualifiers_gate_overlap() {
        assert!(patterns_overlap("api:src/*", "api:src/app.ts", "proj-a"));
        assert!(!patterns_overlap("api:src/*", "web:src/app.ts", "proj-a"));
        // Unqualified normalizes onto the default repo.
        assert!(patterns_overlap("src/*", "proj-a:src/app.ts", "proj-a"));
        assert!(!patterns_overlap("src/*", "other:src/app.ts", "proj-a"));
    }

    #[test]
    fn wildcard_repo_matches_every_repo() {
        assert!(patterns_overlap("*:src/*", "api:src/app.ts", "proj-a"));
        assert!(patterns_overlap("api:src/app.ts", "*:src/*", "proj-a"));
        assert!(patterns_overlap("*:src/*", "src/app.ts", "proj-a"));
    }

    #[test]
    fn pattern_with_slash_before_colon_is_unqualified() {
        // `src/a:b` has a slash before the colon — the colon is part of the path.
        let (repo, path) = split_repo("src/a:b");
        assert_eq!(repo, None);
        assert_eq!(path, "src/a:b");
    }

    #[test]
    fn pending_key_is_stable_12_hex() {
        let key = pending_key("amber", "src/*");
        assert_eq!(key.len(), 12);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, pending_key("amber", "src/*"));
        assert_ne!(key, pending_key("basil", "src/*"));
    }
}
