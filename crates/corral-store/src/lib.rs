//! Typed client for the external `br` bead store binary.
//!
//! The bead store is the authoritative source for task state and ownership;
//! the control plane only reads listings and mutates `status`/`owner`
//! through it. `BeadStore` is the seam: production code uses [`BrClient`]
//! (shelling out to `br` with JSON output), tests and dry-run tooling use
//! [`MemoryStore`].

pub mod client;
pub mod memory;

pub use client::BrClient;
pub use memory::MemoryStore;

use async_trait::async_trait;
use corral_core::types::{Bead, BeadStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `br` could not be launched at all — the store is unreachable.
    #[error("failed to launch bead store binary `{binary}`: {source}")]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bead store command failed (exit {code:?}): {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },
    #[error("bead store returned unparseable output: {0}")]
    Parse(String),
    #[error("bead not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The bead store operations the control plane relies on.
#[async_trait]
pub trait BeadStore: Send + Sync {
    /// Beads that are ready to be worked (dependencies satisfied).
    async fn ready(&self) -> Result<Vec<Bead>>;

    /// All beads, optionally filtered by status.
    async fn list(&self, status: Option<BeadStatus>) -> Result<Vec<Bead>>;

    async fn show(&self, id: &str) -> Result<Bead>;

    /// Update status and/or assignee. `None` leaves the field untouched.
    async fn update(
        &self,
        id: &str,
        status: Option<BeadStatus>,
        assignee: Option<&str>,
    ) -> Result<()>;

    async fn close(&self, id: &str) -> Result<()>;
}
