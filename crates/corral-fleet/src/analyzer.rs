//! Queue composition analysis: classify ready beads by required skill and
//! recommend scaling actions.
//!
//! Classification is deterministic. Labels are authoritative; keyword
//! families are tested narrow before broad so that e.g. "test the deploy
//! pipeline" lands on qa, not devops.

use std::collections::BTreeMap;

use corral_core::config::ScalerConfig;
use corral_core::types::Bead;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Skill classification
// ---------------------------------------------------------------------------

/// Label → type rules, in priority order. A label match short-circuits the
/// keyword scan entirely.
const LABEL_RULES: &[(&[&str], &str)] = &[
    (&["frontend", "ui"], "frontend"),
    (&["backend", "api"], "backend"),
    (&["devops", "infrastructure"], "devops"),
    (&["docs", "documentation"], "docs"),
    (&["qa", "testing"], "qa"),
];

/// Keyword families, narrow before broad. The first family with any hit
/// wins; within a family any keyword suffices.
const KEYWORD_FAMILIES: &[(&str, &[&str])] = &[
    ("qa", &["test", "coverage", "lint", "e2e", "benchmark"]),
    ("docs", &["document", "readme", "guide", "openapi"]),
    ("devops", &["docker", "kubernetes", "ci/cd", "deploy", "pipeline", "terraform", "helm"]),
    ("frontend", &["css", "component", "ui/ux", "react", "vue", "angular", "layout", "style", "responsive"]),
    ("backend", &["api", "database", "endpoint", "schema", "sql", "auth", "service"]),
];

/// The agent type a bead calls for.
pub fn classify(bead: &Bead) -> &'static str {
    let labels: Vec<String> = bead.labels.iter().map(|l| l.to_lowercase()).collect();
    for (rule_labels, agent_type) in LABEL_RULES {
        if labels.iter().any(|l| rule_labels.contains(&l.as_str())) {
            return agent_type;
        }
    }
    let text = bead.classification_text();
    for (agent_type, keywords) in KEYWORD_FAMILIES {
        if keywords.iter().any(|k| text.contains(k)) {
            return agent_type;
        }
    }
    "general"
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum Recommendation {
    ScaleUp { count: usize, agent_type: String },
    CheckIdle,
    Warning { message: String },
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recommendation::ScaleUp { count, agent_type } => {
                write!(f, "scale-up:{count}:{agent_type}")
            }
            Recommendation::CheckIdle => write!(f, "check-idle:teardown"),
            Recommendation::Warning { message } => write!(f, "warning:{message}"),
        }
    }
}

/// Feedback from the performance tracker that tilts the spawn count.
#[derive(Debug, Clone, Default)]
pub struct LifecycleStats {
    pub active_tasks: usize,
    pub completed_tasks: usize,
    /// Fraction of completions with quality ≥ 50, when any quality exists.
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueAnalysis {
    pub ready_tasks: usize,
    pub active_agents: usize,
    pub ratio: f64,
    pub types_needed: BTreeMap<String, usize>,
    pub recommendations: Vec<Recommendation>,
}

/// Analyze the ready queue against the live fleet. Pure and deterministic:
/// identical inputs produce identical output.
pub fn analyze(
    ready: &[Bead],
    active_agents: usize,
    config: &ScalerConfig,
    lifecycle: Option<&LifecycleStats>,
) -> QueueAnalysis {
    let mut types_needed: BTreeMap<String, usize> = BTreeMap::new();
    for bead in ready {
        *types_needed.entry(classify(bead).to_string()).or_insert(0) += 1;
    }

    let ratio = ready.len() as f64 / (active_agents + 1) as f64;
    let mut recommendations = Vec::new();

    if ratio > config.scale_up_ratio && active_agents < config.max_agents {
        let mut count = match ready.len() {
            n if n >= 15 => 3,
            n if n >= 10 => 2,
            _ => 1,
        };
        if let Some(stats) = lifecycle {
            // Many in-flight tasks and few completions: the fleet is not
            // keeping up, so lean one agent heavier.
            if stats.active_tasks > 2 * stats.completed_tasks && stats.active_tasks >= 3 {
                count += 1;
            }
        }
        count = count.min(config.max_agents - active_agents);
        if count > 0 {
            recommendations.push(Recommendation::ScaleUp {
                count,
                agent_type: dominant_type(&types_needed),
            });
        }
    }

    if ready.is_empty() && active_agents > config.min_agents {
        recommendations.push(Recommendation::CheckIdle);
    }

    if let Some(stats) = lifecycle {
        if matches!(stats.success_rate, Some(rate) if rate < 0.3) {
            recommendations.push(Recommendation::Warning {
                message: "low-success-rate".into(),
            });
        }
    }

    QueueAnalysis {
        ready_tasks: ready.len(),
        active_agents,
        ratio,
        types_needed,
        recommendations,
    }
}

/// Most-demanded type; ties break to the lexicographically first key so the
/// result is stable.
fn dominant_type(types_needed: &BTreeMap<String, usize>) -> String {
    types_needed
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(t, _)| t.clone())
        .unwrap_or_else(|| "general".into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
