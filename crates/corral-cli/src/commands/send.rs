use std::process::ExitCode;

use anyhow::Result;
use corral_fleet::router::DeliveryMode;

use crate::context::CliContext;

pub async fn run(
    ctx: &CliContext,
    recipients: &str,
    subject: &str,
    body: &str,
    mode: &str,
    message_type: Option<&str>,
    dry_run: bool,
) -> Result<ExitCode> {
    let mode: DeliveryMode = mode.parse().map_err(anyhow::Error::msg)?;
    let router = ctx.router()?;
    let outcome = router
        .send(recipients, subject, body, mode, message_type, dry_run)
        .await?;

    if outcome.dry_run {
        println!("dry run: would deliver to {} recipient(s)", outcome.recipients.len());
        for recipient in &outcome.recipients {
            println!(
                "  {}\tpane: {}",
                recipient.name,
                recipient.pane.as_deref().unwrap_or("-")
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    for recipient in &outcome.recipients {
        println!(
            "  {}\ttmux: {}\tmail: {}",
            recipient.name,
            channel(recipient.tmux_ok),
            channel(recipient.mail_ok)
        );
    }
    if outcome.success {
        println!("delivered to {} recipient(s)", outcome.recipients.len());
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("error: some recipients received nothing");
        Ok(ExitCode::FAILURE)
    }
}

fn channel(status: Option<bool>) -> &'static str {
    match status {
        Some(true) => "ok",
        Some(false) => "failed",
        None => "skipped",
    }
}
