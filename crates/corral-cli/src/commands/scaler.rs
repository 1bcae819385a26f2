use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use corral_daemon::daemon::CorralDaemon;
use corral_daemon::scaler::{AutoScaler, ScaleReport};
use corral_fleet::spawner::{Spawner, Teardown, TeardownTarget};

use crate::context::CliContext;

fn build_spawner(ctx: &CliContext) -> Spawner {
    Spawner::new(
        ctx.paths.clone(),
        ctx.registry(),
        ctx.identity(),
        ctx.mux(),
        Duration::from_millis(ctx.config.scaler.spawn_delay_ms),
    )
}

fn build_teardown(ctx: &CliContext, grace: Duration) -> Result<Teardown> {
    Ok(Teardown::new(
        ctx.paths.clone(),
        ctx.registry(),
        ctx.identity(),
        ctx.mux(),
        ctx.mail()?,
        ctx.store(),
        ctx.router()?,
        ctx.config.reservations.clone(),
        grace,
    ))
}

fn build_scaler(ctx: &CliContext) -> Result<AutoScaler> {
    Ok(AutoScaler::new(
        ctx.paths.clone(),
        ctx.config.scaler.clone(),
        ctx.store(),
        ctx.registry(),
        build_spawner(ctx),
        build_teardown(ctx, Duration::ZERO)?,
    ))
}

pub async fn scale_up(
    ctx: &CliContext,
    count: u32,
    agent_type: &str,
    session: Option<&str>,
) -> Result<ExitCode> {
    let active = ctx.registry().active().len();
    let room = ctx.config.scaler.max_agents.saturating_sub(active);
    if room == 0 {
        eprintln!(
            "error: fleet already at max_agents ({})",
            ctx.config.scaler.max_agents
        );
        return Ok(ExitCode::FAILURE);
    }
    let allowed = (count as usize).min(room) as u32;
    if allowed < count {
        println!("warning: capacity clamps spawn to {allowed} of {count}");
    }

    let state = build_spawner(ctx).spawn_swarm(allowed, agent_type, session).await?;
    let names: Vec<&str> = state.agents.iter().map(|a| a.name.as_str()).collect();
    println!(
        "spawned {} {} agent(s) in session {}: {}",
        state.agents.len(),
        agent_type,
        state.session,
        names.join(", ")
    );
    Ok(ExitCode::SUCCESS)
}

pub async fn scale_down(
    ctx: &CliContext,
    swarm: Option<String>,
    agent: Option<String>,
    force: bool,
) -> Result<ExitCode> {
    let target = match (swarm, agent) {
        (Some(session), None) => TeardownTarget::Swarm(session),
        (None, Some(name)) => TeardownTarget::Agent(name),
        _ => {
            eprintln!("error: pass exactly one of --swarm or --agent");
            return Ok(ExitCode::FAILURE);
        }
    };
    let teardown = build_teardown(ctx, Duration::from_secs(2))?;
    let report = teardown.run(target, force).await?;
    print_teardown(&report);
    Ok(ExitCode::SUCCESS)
}

pub async fn check_idle(ctx: &CliContext) -> Result<ExitCode> {
    let scaler = build_scaler(ctx)?;
    let mut report = ScaleReport::default();
    scaler.check_idle(Utc::now(), &mut report).await;
    if report.torn_down.is_empty() {
        println!("no idle agents past the timeout");
    } else {
        println!("tore down {} idle agent(s): {}", report.torn_down.len(), report.torn_down.join(", "));
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Foreground auto mode: the same combined loop the daemon runs.
pub async fn auto(ctx: &CliContext) -> Result<ExitCode> {
    let daemon = CorralDaemon::build(ctx.paths.clone(), ctx.config.clone())?;
    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.trigger();
        }
    });
    daemon.run().await?;
    Ok(ExitCode::SUCCESS)
}

pub fn track_start(
    ctx: &CliContext,
    agent: &str,
    task_id: &str,
    labels: Vec<String>,
) -> Result<ExitCode> {
    ctx.tracker().start(agent, task_id, &labels)?;
    println!("tracking {agent} on {task_id}");
    Ok(ExitCode::SUCCESS)
}

pub fn track_complete(
    ctx: &CliContext,
    agent: &str,
    task_id: &str,
    quality: Option<f64>,
) -> Result<ExitCode> {
    let record = ctx.tracker().complete(agent, task_id, quality)?;
    match record.duration_seconds {
        Some(secs) => println!("completed {task_id} in {secs}s"),
        None => println!("warning: completion without matching start recorded"),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_teardown(report: &corral_fleet::spawner::TeardownReport) {
    println!(
        "teardown: {} agent(s), {} reservation(s) released, {} pane(s) killed in {}s",
        report.agents.len(),
        report.reservations_released,
        report.panes_killed,
        report.duration_secs
    );
    match report.efficiency {
        Some(e) => println!(
            "work: {} completed / {} in progress (efficiency {:.0}%)",
            report.completed,
            report.in_progress,
            e * 100.0
        ),
        None => println!("work: none recorded"),
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
}
