mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, mission::MissionSubcommand, safety::SafetySubcommand,
    task::TaskSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mission",
    about = "SDLC mission orchestrator: phases, specialists, safety kernel and audit log",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .mission/ or .git/)
    #[arg(long, global = true, env = "MISSION_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .mission/ in the current project and import legacy records
    Init,

    /// Create, list, inspect and delete missions
    Mission {
        #[command(subcommand)]
        subcommand: MissionSubcommand,
    },

    /// Run the mission's current phase (repairs included)
    RunPhase {
        /// Mission UUID
        uuid: String,
    },

    /// Show the decision log (and optionally tool calls) for a mission
    Log {
        uuid: String,
        /// Include worker tool calls
        #[arg(long)]
        tool_calls: bool,
    },

    /// Manage the task roadmap
    Task {
        #[command(subcommand)]
        subcommand: TaskSubcommand,
    },

    /// Exercise the safety kernel for a mission
    Safety {
        #[command(subcommand)]
        subcommand: SafetySubcommand,
    },

    /// Validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::RunPhase { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Mission { subcommand } => cmd::mission::run(&root, subcommand, cli.json),
        Commands::RunPhase { uuid } => cmd::run::run(&root, &uuid, cli.json),
        Commands::Log { uuid, tool_calls } => cmd::log::run(&root, &uuid, tool_calls, cli.json),
        Commands::Task { subcommand } => cmd::task::run(&root, subcommand, cli.json),
        Commands::Safety { subcommand } => cmd::safety::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        let code = e
            .downcast_ref::<cmd::run::RunExit>()
            .map(|exit| exit.exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}
