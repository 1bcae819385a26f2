//! Agent type catalog and instance registry.
//!
//! Types come from `.agent-profiles/types.yaml` (built-in catalog when the
//! file is absent). An instance is registered iff its JSON file exists under
//! `.agent-profiles/instances/` — the file is the record.

use std::collections::BTreeMap;

use corral_core::fsutil;
use corral_core::paths::ProjectPaths;
use corral_core::types::{AgentInstance, AgentTypeDef, InstanceStatus};
use serde::Deserialize;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid agent type: `{0}`")]
    InvalidType(String),
    #[error("agent not found: `{0}`")]
    AgentNotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

// ---------------------------------------------------------------------------
// TypeCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CatalogFile {
    types: Vec<AgentTypeDef>,
}

#[derive(Debug, Clone)]
pub struct TypeCatalog {
    types: BTreeMap<String, AgentTypeDef>,
}

impl TypeCatalog {
    /// The default fleet: one type per skill category plus a coordinator.
    pub fn builtin() -> Self {
        let defs = [
            AgentTypeDef::new(
                "frontend",
                &["frontend", "ui", "css", "component", "react", "layout", "style", "responsive"],
            ),
            AgentTypeDef::new(
                "backend",
                &["backend", "api", "database", "endpoint", "schema", "sql", "auth", "service"],
            ),
            AgentTypeDef::new(
                "devops",
                &["devops", "infrastructure", "docker", "kubernetes", "deploy", "pipeline", "terraform", "helm"],
            ),
            AgentTypeDef::new("docs", &["docs", "documentation", "readme", "guide", "openapi"]),
            AgentTypeDef::new("qa", &["qa", "testing", "test", "coverage", "lint", "e2e", "benchmark"]),
            AgentTypeDef::new("general", &["general"]),
            AgentTypeDef {
                capacity_limit: 1,
                ..AgentTypeDef::new("coordinator", &["coordination", "planning", "review"])
            },
        ];
        Self {
            types: defs.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    /// Load from `types.yaml`; absent or unparseable files fall back to the
    /// built-in catalog (unparseable is reported).
    pub fn load(paths: &ProjectPaths) -> Self {
        let file = paths.types_catalog();
        let Ok(text) = std::fs::read_to_string(&file) else {
            return Self::builtin();
        };
        match serde_yaml::from_str::<CatalogFile>(&text) {
            Ok(parsed) => Self {
                types: parsed.types.into_iter().map(|d| (d.name.clone(), d)).collect(),
            },
            Err(e) => {
                warn!(path = %file.display(), error = %e, "unparseable type catalog, using builtin");
                Self::builtin()
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&AgentTypeDef> {
        self.types.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.types.keys().map(|s| s.as_str()).collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &AgentTypeDef> {
        self.types.values()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct Registry {
    paths: ProjectPaths,
    catalog: TypeCatalog,
}

impl Registry {
    pub fn open(paths: ProjectPaths) -> Self {
        let catalog = TypeCatalog::load(&paths);
        Self { paths, catalog }
    }

    pub fn with_catalog(paths: ProjectPaths, catalog: TypeCatalog) -> Self {
        Self { paths, catalog }
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn validate(&self, agent_type: &str) -> bool {
        self.catalog.contains(agent_type)
    }

    pub fn capabilities(&self, agent_type: &str) -> Result<Vec<String>> {
        self.catalog
            .get(agent_type)
            .map(|t| t.capabilities.iter().cloned().collect())
            .ok_or_else(|| RegistryError::InvalidType(agent_type.into()))
    }

    /// Register an agent. Idempotent for `(name, type)`; a different type
    /// for an existing name is treated as explicit re-registration. An
    /// inactive instance reappearing under the same identity is revived.
    pub fn register(&self, name: &str, agent_type: &str) -> Result<AgentInstance> {
        if !self.catalog.contains(agent_type) {
            return Err(RegistryError::InvalidType(agent_type.into()));
        }
        let file = self.paths.instance_file(name);
        if let Some(mut existing) = fsutil::read_json::<AgentInstance>(&file) {
            if existing.agent_type == agent_type {
                if existing.status != InstanceStatus::Active {
                    existing.status = InstanceStatus::Active;
                    fsutil::atomic_write_json(&file, &existing)?;
                    info!(agent = %name, "revived inactive agent");
                }
                return Ok(existing);
            }
            warn!(
                agent = %name,
                old_type = %existing.agent_type,
                new_type = %agent_type,
                "re-registering agent under a new type"
            );
        }
        let instance = AgentInstance::new(name, agent_type);
        fsutil::atomic_write_json(&file, &instance)?;
        info!(agent = %name, agent_type = %agent_type, "registered agent");
        Ok(instance)
    }

    /// Remove an instance. Absent instances are a warning, not a failure —
    /// returns `false` when there was nothing to remove.
    pub fn unregister(&self, name: &str) -> Result<bool> {
        let file = self.paths.instance_file(name);
        if !file.exists() {
            warn!(agent = %name, "unregister: agent was not registered");
            return Ok(false);
        }
        std::fs::remove_file(&file)?;
        info!(agent = %name, "unregistered agent");
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<AgentInstance> {
        fsutil::read_json(&self.paths.instance_file(name))
    }

    /// Every instance on disk, sorted by name.
    pub fn instances(&self) -> Vec<AgentInstance> {
        let Ok(entries) = std::fs::read_dir(self.paths.instances_dir()) else {
            return Vec::new();
        };
        let mut out: Vec<AgentInstance> = entries
            .flatten()
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
            .filter_map(|e| fsutil::read_json(&e.path()))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn active(&self) -> Vec<AgentInstance> {
        self.instances().into_iter().filter(|i| i.is_active()).collect()
    }

    pub fn coordinators(&self) -> Vec<AgentInstance> {
        self.active().into_iter().filter(|i| i.is_coordinator()).collect()
    }

    pub fn set_status(&self, name: &str, status: InstanceStatus) -> Result<()> {
        let file = self.paths.instance_file(name);
        let mut instance: AgentInstance =
            fsutil::read_json(&file).ok_or_else(|| RegistryError::AgentNotFound(name.into()))?;
        instance.status = status;
        fsutil::atomic_write_json(&file, &instance)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_in(dir: &std::path::Path) -> Registry {
        let paths = ProjectPaths::new(dir);
        paths.ensure_layout().unwrap();
        Registry::open(paths)
    }

    #[test]
    fn builtin_catalog_covers_skill_categories() {
        let catalog = TypeCatalog::builtin();
        for t in ["frontend", "backend", "devops", "docs", "qa", "general", "coordinator"] {
            assert!(catalog.contains(t), "missing {t}");
        }
        assert!(catalog.get("qa").unwrap().capabilities.contains("e2e"));
    }

    #[test]
    fn yaml_catalog_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        paths.ensure_layout().unwrap();
        std::fs::write(
            paths.types_catalog(),
            "types:\n  - name: rustacean\n    description: systems work\n    capabilities: [rust, ffi]\n    capacity_limit: 2\n",
        )
        .unwrap();
        let catalog = TypeCatalog::load(&paths);
        assert!(catalog.contains("rustacean"));
        assert!(!catalog.contains("backend"));
        assert_eq!(catalog.get("rustacean").unwrap().capacity_limit, 2);
    }

    #[test]
    fn register_is_idempotent_for_same_type() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry_in(dir.path());
        let first = reg.register("amber", "backend").unwrap();
        let second = reg.register("amber", "backend").unwrap();
        assert_eq!(first.registered_at, second.registered_at);
        assert_eq!(reg.active().len(), 1);
    }

    #[test]
    fn register_rejects_unknown_type() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry_in(dir.path());
        assert!(matches!(
            reg.register("amber", "wizard"),
            Err(RegistryError::InvalidType(_))
        ));
    }

    #[test]
    fn unregister_twice_is_a_noop_after_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry_in(dir.path());
        reg.register("amber", "backend").unwrap();
        assert!(reg.unregister("amber").unwrap());
        assert!(!reg.unregister("amber").unwrap());
        assert!(reg.active().is_empty());
    }

    #[test]
    fn active_appears_exactly_once_until_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry_in(dir.path());
        reg.register("amber", "backend").unwrap();
        reg.register("basil", "qa").unwrap();
        let names: Vec<String> = reg.active().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["amber", "basil"]);
        reg.unregister("amber").unwrap();
        let names: Vec<String> = reg.active().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["basil"]);
    }

    #[test]
    fn inactive_instance_is_revived_on_reregister() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry_in(dir.path());
        reg.register("amber", "backend").unwrap();
        reg.set_status("amber", InstanceStatus::Inactive).unwrap();
        assert!(reg.active().is_empty());
        reg.register("amber", "backend").unwrap();
        assert_eq!(reg.active().len(), 1);
    }

    #[test]
    fn capabilities_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry_in(dir.path());
        let caps = reg.capabilities("backend").unwrap();
        assert!(caps.contains(&"api".to_string()));
        assert!(matches!(
            reg.capabilities("wizard"),
            Err(RegistryError::InvalidType(_))
        ));
    }
}
