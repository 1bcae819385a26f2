//! Agent heartbeat log at `.beads/agent-heartbeats.jsonl`.
//!
//! The monitor appends a beat per active agent on every tick; hung-agent
//! detection compares the latest beat against a staleness threshold.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::fsutil;
use crate::paths::ProjectPaths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatLog {
    path: PathBuf,
}

impl HeartbeatLog {
    pub fn new(paths: &ProjectPaths) -> Self {
        Self { path: paths.heartbeat_log() }
    }

    /// Record a beat for each agent at the current instant.
    pub fn beat_all(&self, agents: &[String]) {
        let now = Utc::now();
        for agent in agents {
            let beat = Heartbeat { agent: agent.clone(), timestamp: now };
            if let Err(e) = fsutil::append_jsonl(&self.path, &beat) {
                warn!(agent = %agent, error = %e, "failed to append heartbeat");
            }
        }
    }

    /// Latest beat per agent.
    pub fn last_beats(&self) -> HashMap<String, DateTime<Utc>> {
        let mut last: HashMap<String, DateTime<Utc>> = HashMap::new();
        for beat in fsutil::read_jsonl::<Heartbeat>(&self.path) {
            let entry = last.entry(beat.agent).or_insert(beat.timestamp);
            if beat.timestamp > *entry {
                *entry = beat.timestamp;
            }
        }
        last
    }

    /// Agents from `expected` whose latest beat is older than `threshold`
    /// (agents with no beat at all count as hung).
    pub fn hung_agents(&self, expected: &[String], threshold: Duration, now: DateTime<Utc>) -> Vec<String> {
        let last = self.last_beats();
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        expected
            .iter()
            .filter(|agent| match last.get(*agent) {
                Some(ts) => now.signed_duration_since(*ts) > threshold,
                None => true,
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beats_update_last_seen() {
        let dir = tempfile::tempdir().unwrap();
        let log = HeartbeatLog::new(&ProjectPaths::new(dir.path()));
        log.beat_all(&["amber".into(), "basil".into()]);
        let last = log.last_beats();
        assert_eq!(last.len(), 2);
    }

    #[test]
    fn fresh_agents_are_not_hung() {
        let dir = tempfile::tempdir().unwrap();
        let log = HeartbeatLog::new(&ProjectPaths::new(dir.path()));
        let agents = vec!["amber".to_string()];
        log.beat_all(&agents);
        let hung = log.hung_agents(&agents, Duration::from_secs(60), Utc::now());
        assert!(hung.is_empty());
    }

    #[test]
    fn missing_beat_counts_as_hung() {
        let dir = tempfile::tempdir().unwrap();
        let log = HeartbeatLog::new(&ProjectPaths::new(dir.path()));
        let hung = log.hung_agents(&["ghost".into()], Duration::from_secs(60), Utc::now());
        assert_eq!(hung, vec!["ghost"]);
    }

    #[test]
    fn old_beat_is_hung() {
        let dir = tempfile::tempdir().unwrap();
        let log = HeartbeatLog::new(&ProjectPaths::new(dir.path()));
        let agents = vec!["amber".to_string()];
        log.beat_all(&agents);
        let later = Utc::now() + chrono::Duration::minutes(31);
        let hung = log.hung_agents(&agents, Duration::from_secs(30 * 60), later);
        assert_eq!(hung, vec!["amber"]);
    }
}
