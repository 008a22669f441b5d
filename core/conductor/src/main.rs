//! conductor: operator CLI and auto-confirm daemon for multi-agent sessions.
//!
//! ## Subcommands
//!
//! - `locks`: inspect, force-release, and reclaim directory locks
//! - `router`: assign tasks to agents and drain the pending queue
//! - `autoconfirm`: run the prompt auto-confirm daemon, or show its statistics

mod autoconfirm;
mod locks;
mod logging;
mod router;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use conductor_core::{load_config, Priority};

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Directory locks, task routing and prompt auto-confirmation for agent sessions")]
#[command(version)]
struct Cli {
    /// Config file (default: $CONDUCTOR_CONFIG, then ~/.conductor/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Directory lock administration
    Locks {
        #[command(subcommand)]
        command: LockCommands,
    },

    /// Task routing
    Router {
        #[command(subcommand)]
        command: RouterCommands,
    },

    /// Prompt auto-confirmation
    Autoconfirm {
        #[command(subcommand)]
        command: AutoconfirmCommands,
    },
}

#[derive(Subcommand)]
enum LockCommands {
    /// List every lock record, live or stale
    List,

    /// Show who holds the lock on a directory
    Status {
        #[arg(value_name = "DIR")]
        directory: PathBuf,
    },

    /// Remove a directory lock regardless of holder
    Unlock {
        #[arg(value_name = "DIR")]
        directory: PathBuf,
    },

    /// Reclaim old locks whose holder process is gone
    Cleanup {
        /// Only consider locks at least this old (default from config)
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum RouterCommands {
    /// Show agents, pending tasks, and recent completions
    Status,

    /// Assign a task, or queue it if no agent or the directory is unavailable
    Assign {
        #[arg(value_name = "DESCRIPTION")]
        description: String,

        /// Target working directory
        #[arg(long = "dir", value_name = "DIR")]
        directory: PathBuf,

        /// Require this agent
        #[arg(long)]
        agent: Option<String>,

        /// Require an agent with this role
        #[arg(long)]
        role: Option<String>,

        /// critical, high, normal or low
        #[arg(long, default_value = "normal", value_parser = parse_priority)]
        priority: Priority,
    },

    /// Mark an agent's active task complete and drain the queue
    Complete {
        #[arg(value_name = "AGENT")]
        agent: String,
    },

    /// Try to dispatch every pending task
    Queue,
}

#[derive(Subcommand)]
enum AutoconfirmCommands {
    /// Run the auto-confirm daemon in the foreground
    Run {
        /// Evaluate every gate but send nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show confirmation statistics
    Stats {
        /// Number of recent confirmations to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn parse_priority(value: &str) -> Result<Priority, String> {
    value.parse()
}

fn main() {
    let cli = Cli::parse();
    let _logging_guard = logging::init();

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        tracing::warn!(error = %err, "Failed to install signal handler");
    }

    if let Err(err) = run(cli, shutdown) {
        tracing::debug!(error = ?err, "Command failed");
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli, shutdown: Arc<AtomicBool>) -> conductor_core::Result<()> {
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Locks { command } => match command {
            LockCommands::List => locks::list(&config),
            LockCommands::Status { directory } => locks::status(&config, &directory),
            LockCommands::Unlock { directory } => locks::unlock(&config, &directory),
            LockCommands::Cleanup { max_age_secs } => locks::cleanup(&config, max_age_secs),
        },
        Commands::Router { command } => match command {
            RouterCommands::Status => router::status(&config),
            RouterCommands::Assign {
                description,
                directory,
                agent,
                role,
                priority,
            } => router::assign(
                &config,
                &description,
                &directory,
                agent.as_deref(),
                role.as_deref(),
                priority,
            ),
            RouterCommands::Complete { agent } => router::complete(&config, &agent),
            RouterCommands::Queue => router::drain(&config),
        },
        Commands::Autoconfirm { command } => match command {
            AutoconfirmCommands::Run { dry_run } => autoconfirm::run(&config, dry_run, shutdown),
            AutoconfirmCommands::Stats { limit } => autoconfirm::stats(&config, limit),
        },
    }
}
