use std::process::ExitCode;

use anyhow::{Context, Result};
use corral_mux::Multiplexer as _;

use crate::context::CliContext;

pub async fn run(ctx: &CliContext, fix: bool) -> Result<ExitCode> {
    let live = ctx
        .mux()
        .list_panes()
        .await
        .context("multiplexer unreachable")?;
    let identity = ctx.identity();
    let instances = ctx.registry().instances();
    let report = identity.audit(&live, &instances);

    if report.is_clean() {
        println!("audit clean: {} binding(s), {} instance(s)", identity.bindings().len(), instances.len());
        return Ok(ExitCode::SUCCESS);
    }

    for (agent, panes) in &report.duplicates {
        println!("conflict: {agent} bound in {} live panes: {}", panes.len(), panes.join(", "));
    }
    for pane in &report.stale_identities {
        println!("stale identity: pane {pane} is dead");
    }
    for file in &report.stale_name_files {
        println!("stale name file: {file}");
    }
    for agent in &report.orphan_instances {
        println!("orphan instance: {agent} has no pane binding");
    }

    if fix {
        let fixed = identity.audit_fix(&report)?;
        println!("removed {fixed} provably stale entr(ies); conflicts and orphans left for review");
    } else {
        println!("re-run with --fix to remove provably stale entries");
    }
    Ok(ExitCode::SUCCESS)
}
