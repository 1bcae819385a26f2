//! (agent, task) compatibility scoring.
//!
//! `score = skill_match × workload_factor × history_score`, every factor in
//! [0, 1]. Monotone in history with the other factors fixed.

use std::collections::BTreeSet;

use corral_core::types::Bead;
use serde::Serialize;

/// Score for a task with no labels at all — mild general fitness.
const UNLABELED_SKILL_MATCH: f64 = 0.6;
/// Skill floor: nobody is a perfect zero.
const SKILL_FLOOR: f64 = 0.1;

#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub agent: String,
    pub skill_match: f64,
    pub workload_factor: f64,
    pub history_score: f64,
    pub score: f64,
}

/// One candidate agent with the inputs the matcher needs.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub capabilities: BTreeSet<String>,
    pub tasks_in_progress: usize,
    pub history_score: f64,
}

/// Fraction of task labels covered by the agent's capabilities.
fn skill_match(capabilities: &BTreeSet<String>, labels: &[String]) -> f64 {
    if labels.is_empty() {
        return UNLABELED_SKILL_MATCH;
    }
    let hits = labels
        .iter()
        .filter(|l| capabilities.contains(&l.to_lowercase()))
        .count();
    (hits as f64 / labels.len() as f64).max(SKILL_FLOOR)
}

pub fn score(candidate: &Candidate, bead: &Bead) -> ScoreBreakdown {
    let skill = skill_match(&candidate.capabilities, &bead.labels);
    let workload = 1.0 / (1.0 + candidate.tasks_in_progress as f64);
    let history = candidate.history_score.clamp(0.0, 1.0);
    ScoreBreakdown {
        agent: candidate.name.clone(),
        skill_match: skill,
        workload_factor: workload,
        history_score: history,
        score: (skill * workload * history).clamp(0.0, 1.0),
    }
}

/// The highest-scoring candidate; ties break to the first in input order.
pub fn best_match<'a>(candidates: &'a [Candidate], bead: &Bead) -> Option<(&'a Candidate, ScoreBreakdown)> {
    let mut best: Option<(&Candidate, ScoreBreakdown)> = None;
    for candidate in candidates {
        let breakdown = score(candidate, bead);
        match &best {
            Some((_, current)) if breakdown.score <= current.score => {}
            _ => best = Some((candidate, breakdown)),
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, caps: &[&str], in_progress: usize, history: f64) -> Candidate {
        Candidate {
            name: name.into(),
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            tasks_in_progress: in_progress,
            history_score: history,
        }
    }

    fn labeled_bead(labels: &[&str]) -> Bead {
        let mut bead = Bead::new("bd-1", "work");
        bead.labels = labels.iter().map(|s| s.to_string()).collect();
        bead
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let c = candidate("amber", &["api", "sql"], 0, 1.0);
        let s = score(&c, &labeled_bead(&["api", "sql"]));
        assert!(s.score > 0.0 && s.score <= 1.0);

        let c = candidate("basil", &[], 10, 0.0);
        let s = score(&c, &labeled_bead(&["api"]));
        assert!((0.0..=1.0).contains(&s.score));
    }

    #[test]
    fn unlabeled_task_scores_default_skill() {
        let c = candidate("amber", &["api"], 0, 0.5);
        let s = score(&c, &labeled_bead(&[]));
        assert!((s.skill_match - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn no_overlap_hits_the_floor() {
        let c = candidate("amber", &["css"], 0, 0.5);
        let s = score(&c, &labeled_bead(&["api", "sql"]));
        assert!((s.skill_match - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_overlap_is_fractional() {
        let c = candidate("amber", &["api"], 0, 0.5);
        let s = score(&c, &labeled_bead(&["api", "sql"]));
        assert!((s.skill_match - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn label_matching_is_case_insensitive() {
        let c = candidate("amber", &["api"], 0, 0.5);
        let s = score(&c, &labeled_bead(&["API"]));
        assert!((s.skill_match - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn workload_halves_per_task_in_flight() {
        let bead = labeled_bead(&["api"]);
        let free = score(&candidate("a", &["api"], 0, 0.5), &bead);
        let busy = score(&candidate("a", &["api"], 1, 0.5), &bead);
        assert!((free.workload_factor - 1.0).abs() < f64::EPSILON);
        assert!((busy.workload_factor - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn score_is_monotone_in_history() {
        let bead = labeled_bead(&["api"]);
        let lo = score(&candidate("a", &["api"], 1, 0.3), &bead);
        let hi = score(&candidate("a", &["api"], 1, 0.9), &bead);
        assert!(hi.score > lo.score);
    }

    #[test]
    fn best_match_takes_max_and_ties_break_first() {
        let bead = labeled_bead(&["api"]);
        let candidates = vec![
            candidate("first", &["api"], 0, 0.5),
            candidate("second", &["api"], 0, 0.5), // identical score
            candidate("loaded", &["api"], 3, 0.5),
        ];
        let (winner, _) = best_match(&candidates, &bead).unwrap();
        assert_eq!(winner.name, "first");

        let candidates = vec![
            candidate("weak", &["css"], 2, 0.4),
            candidate("strong", &["api"], 0, 0.9),
        ];
        let (winner, breakdown) = best_match(&candidates, &bead).unwrap();
        assert_eq!(winner.name, "strong");
        assert!(breakdown.score > 0.8);
    }

    #[test]
    fn best_match_of_empty_is_none() {
        assert!(best_match(&[], &labeled_bead(&["api"])).is_none());
    }
}
