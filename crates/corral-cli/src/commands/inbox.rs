use std::process::ExitCode;

use anyhow::Result;
use corral_mail::read_log::MailReadLog;
use corral_mail::MailTransport as _;

use crate::context::CliContext;

/// Fetch this agent's mail (product-wide when a product marker exists),
/// show unread by default, and track what was shown locally.
pub async fn run(ctx: &CliContext, limit: usize, all: bool, delete: bool) -> Result<ExitCode> {
    let agent = ctx.agent_name()?;
    let mail = ctx.mail()?;
    let project_key = ctx
        .config
        .mail
        .project_key
        .clone()
        .unwrap_or_else(|| ctx.paths.root().to_string_lossy().into_owned());

    let messages = match ctx.paths.product_uid() {
        Some(uid) => mail.fetch_inbox_product(&uid, &agent, limit).await?,
        None => mail.fetch_inbox(&project_key, &agent, limit).await?,
    };

    let read_log = MailReadLog::new(&ctx.paths);
    let messages = if all {
        messages
    } else {
        read_log.filter_unread(messages)
    };

    if messages.is_empty() {
        println!("inbox empty");
        return Ok(ExitCode::SUCCESS);
    }

    let mut shown_ids = Vec::new();
    for message in &messages {
        println!(
            "#{} [{}] {} — {}",
            message.id,
            message.created_at.format("%m-%d %H:%M"),
            message.from,
            message.subject
        );
        println!("    {}", message.body.lines().next().unwrap_or(""));
        read_log.mark_read(message);
        shown_ids.push(message.id);
    }
    println!("{} message(s)", shown_ids.len());

    if delete {
        mail.delete_messages(&project_key, &agent, &shown_ids).await?;
        println!("deleted {} message(s) from the server", shown_ids.len());
    }
    Ok(ExitCode::SUCCESS)
}
