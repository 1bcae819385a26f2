//! corral CLI -- drive the fleet control plane for pane-hosted coding agents.

mod commands;
mod context;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use corral_mail::ReservationError;

use crate::context::CliContext;

/// Fleet control plane for pane-hosted coding agents.
#[derive(Parser)]
#[command(name = "corral", version, about)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(short = 'p', long, global = true, default_value = ".")]
    project_root: String,

    /// Emit JSON where a command supports it.
    #[arg(short = 'j', long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Agent identities and the type catalog.
    Registry {
        #[command(subcommand)]
        command: RegistryCommands,
    },

    /// Analyze the ready queue.
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Scaling actions and the auto-scaler loop.
    Scaler {
        #[command(subcommand)]
        command: ScalerCommands,
    },

    /// (agent, task) compatibility scoring.
    #[command(name = "match")]
    Match {
        #[command(subcommand)]
        command: MatchCommands,
    },

    /// The queue & health monitor daemon.
    Monitor {
        #[command(subcommand)]
        command: MonitorCommands,
    },

    /// Advisory file reservations.
    Reserve {
        #[command(subcommand)]
        command: ReserveCommands,
    },

    /// Broadcast to agents over pane inject + durable mail.
    Send {
        /// Recipients: `@all`, `@active`, `@swarm:X`, `@type:T`,
        /// `@coordinators`, or a comma-separated list of names.
        recipients: String,
        subject: String,
        body: String,
        /// Delivery mode: both, tmux-only, mail-only.
        #[arg(long, default_value = "both")]
        mode: String,
        /// Message type tag (URGENT and BLOCKER upgrade importance).
        #[arg(long = "type")]
        message_type: Option<String>,
        /// Resolve recipients and print intents without delivering.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Fetch this agent's mail and track what was shown.
    Inbox {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        /// Include messages already shown on this host.
        #[arg(long, default_value_t = false)]
        all: bool,
        /// Delete the shown messages from the server.
        #[arg(long, default_value_t = false)]
        delete: bool,
    },

    /// Consistency sweep over bindings, name files, and instances.
    Audit {
        /// Remove provably stale entries (dead-pane files only).
        #[arg(long, default_value_t = false)]
        fix: bool,
    },
}

#[derive(Subcommand)]
enum RegistryCommands {
    /// Register an agent instance.
    Register { name: String, agent_type: String },
    /// Unregister an agent (absent agents warn, not fail).
    Unregister { name: String },
    /// List active instances.
    Active,
    /// List catalog types.
    List,
    /// Show one catalog type.
    Show { agent_type: String },
    /// Check whether a type exists (exit 1 when it does not).
    Validate { agent_type: String },
    /// Print a type's capabilities.
    Capabilities { agent_type: String },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Classify ready beads and print composition + recommendations.
    Analyze,
}

#[derive(Subcommand)]
enum ScalerCommands {
    /// Same analysis the auto loop uses.
    Analyze,
    /// Spawn agents of a type.
    ScaleUp {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        #[arg(short = 't', long = "type")]
        agent_type: String,
        /// Swarm session name (defaults to swarm-<type>).
        #[arg(short = 's', long)]
        session: Option<String>,
    },
    /// Tear down a swarm or a single agent.
    ScaleDown {
        /// Swarm session name.
        #[arg(long, conflicts_with = "agent")]
        swarm: Option<String>,
        /// Single agent name.
        #[arg(long)]
        agent: Option<String>,
        /// Skip pre-checks (in-progress work, reservations, dirty repo).
        #[arg(short = 'f', long, default_value_t = false)]
        force: bool,
    },
    /// Tear down agents idle past the timeout.
    CheckIdle,
    /// Run the periodic auto-scaler + monitor loop in the foreground.
    Auto,
    /// Manually feed the performance tracker.
    Track {
        #[command(subcommand)]
        command: TrackCommands,
    },
}

#[derive(Subcommand)]
enum TrackCommands {
    /// Record that an agent started a task.
    Start {
        agent: String,
        task_id: String,
        /// Task labels (repeatable).
        #[arg(short = 'l', long = "label")]
        labels: Vec<String>,
    },
    /// Record completion, with an optional quality grade 0-100.
    Complete {
        agent: String,
        task_id: String,
        #[arg(short = 'q', long)]
        quality: Option<f64>,
    },
}

#[derive(Subcommand)]
enum MatchCommands {
    /// Score one agent against one task.
    Score { agent: String, task_id: String },
    /// Pick the best active agent for a task.
    BestMatch { task_id: String },
}

#[derive(Subcommand)]
enum MonitorCommands {
    /// Start the daemon in the background.
    Start,
    /// Stop a running daemon.
    Stop,
    /// Daemon liveness, last tick, and a recent-events tail.
    Status,
    /// Follow the activity stream.
    Attach,
}

#[derive(Subcommand)]
enum ReserveCommands {
    /// Reserve path patterns (exclusive unless --shared).
    Reserve {
        /// Path patterns (repo-qualified patterns like `api:src/*` allowed).
        paths: Vec<String>,
        #[arg(long)]
        ttl: Option<u64>,
        /// Take a shared (non-exclusive) reservation.
        #[arg(long, default_value_t = false)]
        shared: bool,
        #[arg(short = 'r', long, default_value = "")]
        reason: String,
    },
    /// Ask the holder of a path to coordinate, and queue for release news.
    Request {
        path: String,
        #[arg(short = 'r', long, default_value = "")]
        reason: String,
    },
    /// Report holders overlapping the given paths.
    Check { paths: Vec<String> },
    /// Release reservations by path, by id, or all.
    Release {
        paths: Vec<String>,
        #[arg(long = "id")]
        ids: Vec<u64>,
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Extend every held reservation.
    Renew {
        #[arg(long)]
        extend: Option<u64>,
    },
    /// List this agent's reservations.
    List,
    /// List every reservation in the project.
    ListAll,
    /// List reservations inside the expiry warning window.
    WarnExpiring,
}

#[tokio::main]
async fn main() -> ExitCode {
    corral_telemetry::logging::init_logging("corral", "warn");
    let cli = Cli::parse();

    let ctx = match CliContext::new(&cli.project_root, cli.json) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match dispatch(cli.command, &ctx).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            match e.downcast_ref::<ReservationError>() {
                Some(ReservationError::CrossAgentConflict { .. }) => ExitCode::from(5),
                Some(ReservationError::SelfConflict { .. }) => ExitCode::from(6),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn dispatch(command: Commands, ctx: &CliContext) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Registry { command } => match command {
            RegistryCommands::Register { name, agent_type } => {
                commands::registry::register(ctx, &name, &agent_type)
            }
            RegistryCommands::Unregister { name } => commands::registry::unregister(ctx, &name),
            RegistryCommands::Active => commands::registry::active(ctx),
            RegistryCommands::List => commands::registry::list_types(ctx),
            RegistryCommands::Show { agent_type } => commands::registry::show_type(ctx, &agent_type),
            RegistryCommands::Validate { agent_type } => {
                commands::registry::validate(ctx, &agent_type)
            }
            RegistryCommands::Capabilities { agent_type } => {
                commands::registry::capabilities(ctx, &agent_type)
            }
        },
        Commands::Queue { command } => match command {
            QueueCommands::Analyze => commands::queue::analyze(ctx).await,
        },
        Commands::Scaler { command } => match command {
            ScalerCommands::Analyze => commands::queue::analyze(ctx).await,
            ScalerCommands::ScaleUp { count, agent_type, session } => {
                commands::scaler::scale_up(ctx, count, &agent_type, session.as_deref()).await
            }
            ScalerCommands::ScaleDown { swarm, agent, force } => {
                commands::scaler::scale_down(ctx, swarm, agent, force).await
            }
            ScalerCommands::CheckIdle => commands::scaler::check_idle(ctx).await,
            ScalerCommands::Auto => commands::scaler::auto(ctx).await,
            ScalerCommands::Track { command } => match command {
                TrackCommands::Start { agent, task_id, labels } => {
                    commands::scaler::track_start(ctx, &agent, &task_id, labels)
                }
                TrackCommands::Complete { agent, task_id, quality } => {
                    commands::scaler::track_complete(ctx, &agent, &task_id, quality)
                }
            },
        },
        Commands::Match { command } => match command {
            MatchCommands::Score { agent, task_id } => {
                commands::matcher::score(ctx, &agent, &task_id).await
            }
            MatchCommands::BestMatch { task_id } => {
                commands::matcher::best_match(ctx, &task_id).await
            }
        },
        Commands::Monitor { command } => match command {
            MonitorCommands::Start => commands::monitor::start(ctx),
            MonitorCommands::Stop => commands::monitor::stop(ctx),
            MonitorCommands::Status => commands::monitor::status(ctx),
            MonitorCommands::Attach => commands::monitor::attach(ctx).await,
        },
        Commands::Reserve { command } => commands::reserve::run(ctx, command).await,
        Commands::Send { recipients, subject, body, mode, message_type, dry_run } => {
            commands::send::run(ctx, &recipients, &subject, &body, &mode, message_type.as_deref(), dry_run)
                .await
        }
        Commands::Inbox { limit, all, delete } => {
            commands::inbox::run(ctx, limit, all, delete).await
        }
        Commands::Audit { fix } => commands::audit::run(ctx, fix).await,
    }
}

pub(crate) use ReserveCommands as ReserveCmd;
