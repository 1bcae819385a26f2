//! Pane ↔ agent bindings and the self-audit over them.
//!
//! Each bound pane has two files: a JSON identity file under `panes/` and a
//! fast-lookup name file under `pids/`. A pane is live iff its id appears
//! in the multiplexer listing; identity files for dead panes are archived
//! rather than deleted so a resurrected session can restore context.

use chrono::Utc;
use corral_core::fsutil;
use corral_core::paths::{safe_pane, ProjectPaths};
use corral_core::types::{AgentInstance, PaneIdentity};
use corral_mux::PaneInfo;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The same agent name is bound in another live pane. Never resolved
    /// silently.
    #[error("agent `{agent}` is already bound to live pane {existing_pane}")]
    DuplicateBinding { agent: String, existing_pane: String },
    #[error("pane {0} has no bound agent")]
    NotBound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IdentityError>;

// ---------------------------------------------------------------------------
// IdentityStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IdentityStore {
    paths: ProjectPaths,
}

impl IdentityStore {
    pub fn new(paths: ProjectPaths) -> Self {
        Self { paths }
    }

    /// Bind `agent` to `pane_id`, refusing when the name is already bound to
    /// a *different live* pane. Rebinding the same pane to a new name is
    /// treated as explicit re-registration and rewrites both files.
    pub fn bind(
        &self,
        pane_id: &str,
        agent: &str,
        agent_type: &str,
        live_panes: &[PaneInfo],
    ) -> Result<PaneIdentity> {
        for (other_pane, identity) in self.bindings() {
            if identity.agent_mail_name == agent && other_pane != pane_id {
                let live = live_panes.iter().any(|p| p.pane_id == other_pane);
                if live {
                    return Err(IdentityError::DuplicateBinding {
                        agent: agent.into(),
                        existing_pane: other_pane,
                    });
                }
            }
        }

        let identity = PaneIdentity {
            pane: pane_id.to_string(),
            agent_mail_name: agent.to_string(),
            agent_type: agent_type.to_string(),
            project_root: Some(self.paths.root().to_string_lossy().into_owned()),
            bound_at: Some(Utc::now()),
        };
        fsutil::atomic_write_json(&self.paths.pane_identity_file(pane_id), &identity)?;
        fsutil::atomic_write_string(&self.paths.pane_name_file(pane_id), &format!("{agent}\n"))?;
        info!(pane = %pane_id, agent = %agent, "bound pane identity");
        Ok(identity)
    }

    /// Release a binding: remove the name file and archive the identity
    /// file (never deleted — session resurrection reads the archive).
    pub fn release(&self, pane_id: &str) -> Result<()> {
        let name_file = self.paths.pane_name_file(pane_id);
        if name_file.exists() {
            std::fs::remove_file(&name_file)?;
        }
        let identity_file = self.paths.pane_identity_file(pane_id);
        if identity_file.exists() {
            let archived = self.paths.pane_archive_dir().join(format!(
                "{}.identity.{}",
                safe_pane(pane_id),
                Utc::now().timestamp()
            ));
            std::fs::create_dir_all(self.paths.pane_archive_dir())?;
            std::fs::rename(&identity_file, &archived)?;
            info!(pane = %pane_id, archived = %archived.display(), "archived pane identity");
        }
        Ok(())
    }

    pub fn identity(&self, pane_id: &str) -> Option<PaneIdentity> {
        fsutil::read_json(&self.paths.pane_identity_file(pane_id))
    }

    /// Fast lookup through the name file.
    pub fn agent_for_pane(&self, pane_id: &str) -> Option<String> {
        let text = std::fs::read_to_string(self.paths.pane_name_file(pane_id)).ok()?;
        let name = text.trim().to_string();
        (!name.is_empty()).then_some(name)
    }

    /// Reverse lookup by scanning identity files.
    pub fn pane_for_agent(&self, agent: &str) -> Option<String> {
        self.bindings()
            .into_iter()
            .find(|(_, identity)| identity.agent_mail_name == agent)
            .map(|(pane, _)| pane)
    }

    /// All current `(pane_id, identity)` bindings.
    pub fn bindings(&self) -> Vec<(String, PaneIdentity)> {
        let Ok(entries) = std::fs::read_dir(self.paths.panes_dir()) else {
            return Vec::new();
        };
        let mut out: Vec<(String, PaneIdentity)> = entries
            .flatten()
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("identity"))
            .filter_map(|e| fsutil::read_json::<PaneIdentity>(&e.path()))
            .map(|identity| (identity.pane.clone(), identity))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Agent names whose bound pane is currently live.
    pub fn live_agents(&self, live_panes: &[PaneInfo]) -> Vec<String> {
        self.bindings()
            .into_iter()
            .filter(|(pane, _)| live_panes.iter().any(|p| &p.pane_id == pane))
            .map(|(_, identity)| identity.agent_mail_name)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Self-audit
// ---------------------------------------------------------------------------

/// What a consistency sweep over bindings and instances found.
#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    /// Agent names bound in more than one live pane. Reported, never fixed.
    pub duplicates: Vec<(String, Vec<String>)>,
    /// Identity files whose pane is dead.
    pub stale_identities: Vec<String>,
    /// Name files whose pane is dead.
    pub stale_name_files: Vec<String>,
    /// Registered instances with no pane binding at all.
    pub orphan_instances: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty()
            && self.stale_identities.is_empty()
            && self.stale_name_files.is_empty()
            && self.orphan_instances.is_empty()
    }
}

impl IdentityStore {
    /// Sweep bindings against the live pane listing and registered
    /// instances. Read-only.
    pub fn audit(&self, live_panes: &[PaneInfo], instances: &[AgentInstance]) -> AuditReport {
        let mut report = AuditReport::default();
        let bindings = self.bindings();

        // Duplicate live bindings per agent name.
        let mut by_agent: std::collections::BTreeMap<&str, Vec<&str>> = Default::default();
        for (pane, identity) in &bindings {
            if live_panes.iter().any(|p| &p.pane_id == pane) {
                by_agent.entry(&identity.agent_mail_name).or_default().push(pane);
            }
        }
        for (agent, panes) in by_agent {
            if panes.len() > 1 {
                report.duplicates.push((
                    agent.to_string(),
                    panes.iter().map(|p| p.to_string()).collect(),
                ));
            }
        }

        for (pane, _) in &bindings {
            if !live_panes.iter().any(|p| &p.pane_id == pane) {
                report.stale_identities.push(pane.clone());
            }
        }

        // Name files without a live pane (covers panes with a name file but
        // no identity file as well).
        if let Ok(entries) = std::fs::read_dir(self.paths.pids_dir()) {
            for entry in entries.flatten() {
                let file_name = entry.file_name().to_string_lossy().into_owned();
                let Some(stem) = file_name.strip_suffix(".agent-name") else {
                    continue;
                };
                let live = live_panes.iter().any(|p| safe_pane(&p.pane_id) == stem);
                if !live {
                    report.stale_name_files.push(file_name);
                }
            }
        }

        let bound: Vec<&str> = bindings.iter().map(|(_, i)| i.agent_mail_name.as_str()).collect();
        for instance in instances {
            if instance.is_active() && !bound.contains(&instance.name.as_str()) {
                report.orphan_instances.push(instance.name.clone());
            }
        }

        report
    }

    /// Remove only provably stale entries: name files and identity files
    /// for dead panes. Duplicates and orphan instances are left for a
    /// human — fixing those silently would guess at intent.
    pub fn audit_fix(&self, report: &AuditReport) -> Result<usize> {
        let mut fixed = 0;
        for pane in &report.stale_identities {
            self.release(pane)?;
            fixed += 1;
        }
        for file_name in &report.stale_name_files {
            let path = self.paths.pids_dir().join(file_name);
            if path.exists() {
                std::fs::remove_file(&path)?;
                fixed += 1;
            }
        }
        if !report.duplicates.is_empty() {
            warn!(count = report.duplicates.len(), "duplicate live bindings require manual resolution");
        }
        Ok(fixed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
