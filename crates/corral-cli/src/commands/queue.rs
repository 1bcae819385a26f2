use std::process::ExitCode;

use anyhow::{Context, Result};
use corral_fleet::analyzer;
use corral_store::BeadStore as _;

use crate::context::CliContext;

pub async fn analyze(ctx: &CliContext) -> Result<ExitCode> {
    let store = ctx.store();
    let ready = store.ready().await.context("bead store unreachable")?;
    let active = ctx.registry().active().len();
    let stats = ctx.tracker().lifecycle_stats();
    let analysis = analyzer::analyze(&ready, active, &ctx.config.scaler, Some(&stats));

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "ready: {}  active: {}  ratio: {:.2}",
        analysis.ready_tasks, analysis.active_agents, analysis.ratio
    );
    for (agent_type, count) in &analysis.types_needed {
        println!("  {agent_type}: {count}");
    }
    if analysis.recommendations.is_empty() {
        println!("no recommendations");
    } else {
        for recommendation in &analysis.recommendations {
            println!("recommend: {recommendation}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
