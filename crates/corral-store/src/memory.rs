//! In-memory bead store used by tests and dry-run tooling.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use corral_core::types::{Bead, BeadStatus};
use tokio::sync::Mutex;

use crate::{BeadStore, Result, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    beads: Mutex<BTreeMap<String, Bead>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, bead: Bead) {
        self.beads.lock().await.insert(bead.id.clone(), bead);
    }

    pub async fn seed(beads: impl IntoIterator<Item = Bead>) -> Self {
        let store = Self::new();
        for bead in beads {
            store.insert(bead).await;
        }
        store
    }
}

#[async_trait]
impl BeadStore for MemoryStore {
    async fn ready(&self) -> Result<Vec<Bead>> {
        self.list(Some(BeadStatus::Ready)).await
    }

    async fn list(&self, status: Option<BeadStatus>) -> Result<Vec<Bead>> {
        let beads = self.beads.lock().await;
        Ok(beads
            .values()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .cloned()
            .collect())
    }

    async fn show(&self, id: &str) -> Result<Bead> {
        self.beads
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.into()))
    }

    async fn update(
        &self,
        id: &str,
        status: Option<BeadStatus>,
        assignee: Option<&str>,
    ) -> Result<()> {
        let mut beads = self.beads.lock().await;
        let bead = beads.get_mut(id).ok_or_else(|| StoreError::NotFound(id.into()))?;
        if let Some(status) = status {
            bead.status = status;
        }
        if let Some(assignee) = assignee {
            bead.owner = Some(assignee.to_string());
        }
        bead.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn close(&self, id: &str) -> Result<()> {
        self.update(id, Some(BeadStatus::Closed), None).await
    }
}
