use std::process::ExitCode;

use anyhow::{bail, Result};
use chrono::Utc;
use corral_core::types::Reservation;
use corral_mail::reservation::RequestOutcome;
use corral_mail::ReleaseSpec;

use crate::context::CliContext;
use crate::ReserveCmd;

pub async fn run(ctx: &CliContext, command: ReserveCmd) -> Result<ExitCode> {
    let client = ctx.reservations()?;
    match command {
        ReserveCmd::Reserve { paths, ttl, shared, reason } => {
            if paths.is_empty() {
                bail!("no paths given");
            }
            let report = client.reserve(&paths, ttl, !shared, &reason).await?;
            if report.bypassed {
                println!("warning: BYPASS_RESERVATION set, nothing reserved");
                return Ok(ExitCode::SUCCESS);
            }
            if !report.auto_released.is_empty() {
                println!(
                    "warning: auto-released own overlapping reservation(s) {:?}",
                    report.auto_released
                );
            }
            println!("reserved {} path(s)", report.granted.len());
            for reservation in &report.granted {
                print_reservation(reservation);
            }
            Ok(ExitCode::SUCCESS)
        }
        ReserveCmd::Request { path, reason } => {
            match client.request(&path, &reason).await? {
                RequestOutcome::Free => {
                    println!("{path} is free — reserve it directly");
                }
                RequestOutcome::Held { holders } => {
                    println!(
                        "{path} is held by {}; they were notified and you are queued",
                        holders.join(", ")
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        ReserveCmd::Check { paths } => {
            if paths.is_empty() {
                bail!("no paths given");
            }
            let conflicts = client.check(&paths).await?;
            if conflicts.is_empty() {
                println!("no conflicting holders");
                return Ok(ExitCode::SUCCESS);
            }
            for conflict in &conflicts {
                println!("{}\tholds {}", conflict.holder, conflict.path_pattern);
            }
            // The conflict exit code is part of the contract.
            Ok(ExitCode::from(5))
        }
        ReserveCmd::Release { paths, ids, all } => {
            let spec = if all {
                ReleaseSpec::All
            } else if !ids.is_empty() {
                ReleaseSpec::Ids(ids)
            } else if !paths.is_empty() {
                ReleaseSpec::Paths(paths)
            } else {
                bail!("pass paths, --id, or --all");
            };
            let report = client.release(spec).await?;
            println!(
                "released {} reservation(s), notified {} waiting agent(s)",
                report.released.len(),
                report.notified.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        ReserveCmd::Renew { extend } => {
            let renewed = client.renew(extend).await?;
            println!("renewed {} reservation(s)", renewed.len());
            for reservation in &renewed {
                print_reservation(reservation);
            }
            Ok(ExitCode::SUCCESS)
        }
        ReserveCmd::List => {
            let reservations = client.list().await?;
            print_listing(&reservations);
            Ok(ExitCode::SUCCESS)
        }
        ReserveCmd::ListAll => {
            let reservations = client.list_all().await?;
            print_listing(&reservations);
            Ok(ExitCode::SUCCESS)
        }
        ReserveCmd::WarnExpiring => {
            let expiring = client.warn_expiring().await?;
            if expiring.is_empty() {
                println!("nothing inside the expiry warning window");
            } else {
                for reservation in &expiring {
                    println!(
                        "warning: {} expires in {}s",
                        reservation.path_pattern,
                        reservation.remaining_secs(Utc::now())
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_reservation(reservation: &Reservation) {
    println!(
        "  #{} {} (until {})",
        reservation.id,
        reservation.path_pattern,
        reservation.expires_at.format("%H:%M:%S")
    );
}

fn print_listing(reservations: &[Reservation]) {
    for reservation in reservations {
        println!(
            "#{}\t{}\t{}\texpires {}",
            reservation.id,
            reservation.agent,
            reservation.path_pattern,
            reservation.expires_at.to_rfc3339()
        );
    }
    println!("{} reservation(s)", reservations.len());
}
