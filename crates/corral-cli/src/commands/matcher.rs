use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use corral_fleet::matcher::{self, Candidate};
use corral_store::BeadStore as _;

use crate::context::CliContext;

fn candidate_for(ctx: &CliContext, agent: &str) -> Result<Candidate> {
    let registry = ctx.registry();
    let instance = registry
        .get(agent)
        .with_context(|| format!("agent `{agent}` is not registered"))?;
    let capabilities = registry
        .catalog()
        .get(&instance.agent_type)
        .map(|def| def.capabilities.clone())
        .unwrap_or_default();
    let tracker = ctx.tracker();
    Ok(Candidate {
        name: instance.name,
        capabilities,
        tasks_in_progress: tracker.active_count_for(agent),
        history_score: 0.0, // filled per-task below
    })
}

pub async fn score(ctx: &CliContext, agent: &str, task_id: &str) -> Result<ExitCode> {
    let bead = ctx.store().show(task_id).await?;
    let mut candidate = candidate_for(ctx, agent)?;
    candidate.history_score = ctx.tracker().history_score(agent, &bead.labels);

    let breakdown = matcher::score(&candidate, &bead);
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&breakdown)?);
    } else {
        println!(
            "{} vs {}: {:.3} (skill {:.2} × workload {:.2} × history {:.2})",
            agent, task_id, breakdown.score, breakdown.skill_match,
            breakdown.workload_factor, breakdown.history_score
        );
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn best_match(ctx: &CliContext, task_id: &str) -> Result<ExitCode> {
    let bead = ctx.store().show(task_id).await?;
    let registry = ctx.registry();
    let tracker = ctx.tracker();

    let candidates: Vec<Candidate> = registry
        .active()
        .into_iter()
        .map(|instance| {
            let capabilities = registry
                .catalog()
                .get(&instance.agent_type)
                .map(|def| def.capabilities.clone())
                .unwrap_or_default();
            Candidate {
                tasks_in_progress: tracker.active_count_for(&instance.name),
                history_score: tracker.history_score(&instance.name, &bead.labels),
                name: instance.name,
                capabilities,
            }
        })
        .collect();

    let Some((winner, breakdown)) = matcher::best_match(&candidates, &bead) else {
        bail!("no active agents to match against");
    };
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&breakdown)?);
    } else {
        println!("best match for {}: {} ({:.3})", task_id, winner.name, breakdown.score);
    }
    Ok(ExitCode::SUCCESS)
}
