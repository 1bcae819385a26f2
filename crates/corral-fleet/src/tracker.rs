//! Task duration and quality history.
//!
//! Two JSONL stores: active tracking (`.beads/active-task-tracking.jsonl`)
//! holds one entry per in-flight `(agent, task)`; completions move to
//! `.beads/agent-performance.jsonl` with duration and optional quality.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use corral_core::fsutil;
use corral_core::paths::ProjectPaths;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analyzer::LifecycleStats;

/// Score when an agent has no usable history at all.
const DEFAULT_HISTORY_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTrack {
    pub agent: String,
    pub task_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub agent: String,
    pub task_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    /// 0–100, when a reviewer graded the work.
    #[serde(default)]
    pub quality: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    paths: ProjectPaths,
}

impl PerformanceTracker {
    pub fn new(paths: ProjectPaths) -> Self {
        Self { paths }
    }

    /// Begin tracking `(agent, task)`. A duplicate start is dropped with a
    /// debug line — the first start wins for duration purposes.
    pub fn start(&self, agent: &str, task_id: &str, labels: &[String]) -> std::io::Result<()> {
        let active = self.active_entries();
        if active.iter().any(|t| t.agent == agent && t.task_id == task_id) {
            debug!(agent, task_id, "already tracking, ignoring duplicate start");
            return Ok(());
        }
        let entry = ActiveTrack {
            agent: agent.to_string(),
            task_id: task_id.to_string(),
            labels: labels.to_vec(),
            started_at: Utc::now(),
        };
        fsutil::append_jsonl(&self.paths.active_tracking_log(), &entry)
    }

    /// Complete tracking: removes the active entry and appends a completion
    /// record. Without a matching start the completion is still recorded
    /// (completion time only) and a warning is raised.
    pub fn complete(
        &self,
        agent: &str,
        task_id: &str,
        quality: Option<f64>,
    ) -> std::io::Result<CompletionRecord> {
        let now = Utc::now();
        let mut active = self.active_entries();
        let position = active
            .iter()
            .position(|t| t.agent == agent && t.task_id == task_id);

        let record = match position {
            Some(idx) => {
                let start = active.remove(idx);
                fsutil::rewrite_jsonl(&self.paths.active_tracking_log(), &active)?;
                CompletionRecord {
                    agent: agent.to_string(),
                    task_id: task_id.to_string(),
                    labels: start.labels,
                    started_at: Some(start.started_at),
                    completed_at: now,
                    duration_seconds: Some(
                        (now - start.started_at).num_seconds().max(0) as u64
                    ),
                    quality,
                }
            }
            None => {
                warn!(agent, task_id, "completion without matching start");
                CompletionRecord {
                    agent: agent.to_string(),
                    task_id: task_id.to_string(),
                    labels: Vec::new(),
                    started_at: None,
                    completed_at: now,
                    duration_seconds: None,
                    quality,
                }
            }
        };
        fsutil::append_jsonl(&self.paths.performance_log(), &record)?;
        Ok(record)
    }

    pub fn active_entries(&self) -> Vec<ActiveTrack> {
        fsutil::read_jsonl(&self.paths.active_tracking_log())
    }

    pub fn completions(&self) -> Vec<CompletionRecord> {
        fsutil::read_jsonl(&self.paths.performance_log())
    }

    pub fn active_count_for(&self, agent: &str) -> usize {
        self.active_entries().iter().filter(|t| t.agent == agent).count()
    }

    pub fn agents_with_active_tasks(&self) -> HashSet<String> {
        self.active_entries().into_iter().map(|t| t.agent).collect()
    }

    /// History score for `(agent, labels)` in [0.1, 1.0]:
    /// average quality over completions with overlapping labels, falling
    /// back to all of the agent's completions, falling back to 0.5.
    pub fn history_score(&self, agent: &str, labels: &[String]) -> f64 {
        let completions: Vec<CompletionRecord> = self
            .completions()
            .into_iter()
            .filter(|c| c.agent == agent)
            .collect();

        let overlapping: Vec<f64> = completions
            .iter()
            .filter(|c| {
                c.labels.iter().any(|l| {
                    labels.iter().any(|q| q.eq_ignore_ascii_case(l))
                })
            })
            .filter_map(|c| c.quality)
            .collect();

        let qualities = if !overlapping.is_empty() {
            overlapping
        } else {
            completions.iter().filter_map(|c| c.quality).collect()
        };

        if qualities.is_empty() {
            return DEFAULT_HISTORY_SCORE;
        }
        let avg = qualities.iter().sum::<f64>() / qualities.len() as f64;
        quality_to_score(avg)
    }

    /// Aggregate feedback for the queue analyzer.
    pub fn lifecycle_stats(&self) -> LifecycleStats {
        let completions = self.completions();
        let graded: Vec<f64> = completions.iter().filter_map(|c| c.quality).collect();
        let success_rate = if graded.is_empty() {
            None
        } else {
            Some(graded.iter().filter(|q| **q >= 50.0).count() as f64 / graded.len() as f64)
        };
        LifecycleStats {
            active_tasks: self.active_entries().len(),
            completed_tasks: completions.len(),
            success_rate,
        }
    }
}

/// Map quality in [0, 100] to a score in [0.1, 1.0].
fn quality_to_score(quality: f64) -> f64 {
    (0.1 + 0.9 * quality / 100.0).clamp(0.1, 1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_in(dir: &std::path::Path) -> PerformanceTracker {
        let paths = ProjectPaths::new(dir);
        paths.ensure_layout().unwrap();
        PerformanceTracker::new(paths)
    }

    #[test]
    fn start_complete_records_duration() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.start("amber", "bd-1", &["backend".into()]).unwrap();
        assert_eq!(tracker.active_count_for("amber"), 1);

        let record = tracker.complete("amber", "bd-1", Some(80.0)).unwrap();
        assert!(record.duration_seconds.is_some());
        assert_eq!(record.labels, vec!["backend"]);
        assert_eq!(tracker.active_count_for("amber"), 0);
        assert_eq!(tracker.completions().len(), 1);
    }

    #[test]
    fn duplicate_start_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.start("amber", "bd-1", &[]).unwrap();
        tracker.start("amber", "bd-1", &[]).unwrap();
        assert_eq!(tracker.active_entries().len(), 1);
    }

    #[test]
    fn orphan_completion_records_completion_only() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        let record = tracker.complete("amber", "bd-404", Some(60.0)).unwrap();
        assert!(record.started_at.is_none());
        assert!(record.duration_seconds.is_none());
        assert_eq!(tracker.completions().len(), 1);
    }

    #[test]
    fn history_score_defaults_to_half() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        assert!((tracker.history_score("amber", &["backend".into()]) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn history_prefers_overlapping_labels() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.start("amber", "bd-1", &["backend".into()]).unwrap();
        tracker.complete("amber", "bd-1", Some(100.0)).unwrap();
        tracker.start("amber", "bd-2", &["docs".into()]).unwrap();
        tracker.complete("amber", "bd-2", Some(20.0)).unwrap();

        // Backend query sees only the backend completion: 0.1 + 0.9*1.0 = 1.0
        let backend = tracker.history_score("amber", &["backend".into()]);
        assert!((backend - 1.0).abs() < 1e-9);

        // Unrelated labels fall back to the all-completions average (60).
        let other = tracker.history_score("amber", &["devops".into()]);
        assert!((other - (0.1 + 0.9 * 0.6)).abs() < 1e-9);
    }

    #[test]
    fn ungraded_completions_keep_default_score() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.start("amber", "bd-1", &["backend".into()]).unwrap();
        tracker.complete("amber", "bd-1", None).unwrap();
        assert!((tracker.history_score("amber", &["backend".into()]) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn quality_mapping_bounds() {
        assert!((quality_to_score(0.0) - 0.1).abs() < f64::EPSILON);
        assert!((quality_to_score(100.0) - 1.0).abs() < f64::EPSILON);
        assert!((quality_to_score(50.0) - 0.55).abs() < f64::EPSILON);
    }

    #[test]
    fn lifecycle_stats_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.start("amber", "bd-1", &[]).unwrap();
        tracker.start("basil", "bd-2", &[]).unwrap();
        tracker.complete("basil", "bd-2", Some(90.0)).unwrap();
        tracker.complete("cedar", "bd-3", Some(10.0)).unwrap();

        let stats = tracker.lifecycle_stats();
        assert_eq!(stats.active_tasks, 1);
        assert_eq!(stats.completed_tasks, 2);
        assert!((stats.success_rate.unwrap() - 0.5).abs() < f64::EPSILON);
    }
}
