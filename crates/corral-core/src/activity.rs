//! Append-only activity event stream at `.beads/agent-activity.jsonl`.
//!
//! Every subsystem appends here; readers treat the file as a multiset
//! ordered by timestamp with best-effort monotonicity across writers.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::fsutil;
use crate::paths::ProjectPaths;
use crate::types::{ActivityEvent, ActivityKind};

#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(paths: &ProjectPaths) -> Self {
        Self { path: paths.activity_log() }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one event. Failures are logged, never propagated — losing an
    /// activity line must not abort the operation that produced it.
    pub fn append(&self, event: &ActivityEvent) {
        if let Err(e) = fsutil::append_jsonl(&self.path, event) {
            warn!(path = %self.path.display(), error = %e, "failed to append activity event");
        }
    }

    /// Convenience: append an event for an agent with a JSON payload.
    pub fn record(&self, kind: ActivityKind, agent: &str, payload: serde_json::Value) {
        self.append(&ActivityEvent::for_agent(kind, agent).with_payload(payload));
    }

    /// Convenience: append an agent-less event (monitor transitions etc.).
    pub fn record_system(&self, kind: ActivityKind, payload: serde_json::Value) {
        self.append(&ActivityEvent::new(kind).with_payload(payload));
    }

    pub fn read_all(&self) -> Vec<ActivityEvent> {
        fsutil::read_jsonl(&self.path)
    }

    /// Last `n` events, oldest first.
    pub fn tail(&self, n: usize) -> Vec<ActivityEvent> {
        let mut events = self.read_all();
        if events.len() > n {
            events.drain(..events.len() - n);
        }
        events
    }

    /// Timestamp of the most recent event attributed to each agent — the
    /// input to idle detection.
    pub fn last_event_per_agent(&self) -> HashMap<String, DateTime<Utc>> {
        let mut last: HashMap<String, DateTime<Utc>> = HashMap::new();
        for event in self.read_all() {
            let Some(agent) = event.agent else { continue };
            let entry = last.entry(agent).or_insert(event.timestamp);
            if event.timestamp > *entry {
                *entry = event.timestamp;
            }
        }
        last
    }

    /// Most recent event of `kind` per agent, for cooldown checks.
    pub fn last_of_kind_per_agent(&self, kind: ActivityKind) -> HashMap<String, DateTime<Utc>> {
        let mut last: HashMap<String, DateTime<Utc>> = HashMap::new();
        for event in self.read_all() {
            if event.event != kind {
                continue;
            }
            let Some(agent) = event.agent else { continue };
            let entry = last.entry(agent).or_insert(event.timestamp);
            if event.timestamp > *entry {
                *entry = event.timestamp;
            }
        }
        last
    }
}
