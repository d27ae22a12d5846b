//! playtime: play-time tracking for locally installed games.
//!
//! # Usage
//!
//! ```text
//! playtime init [--force]
//! playtime game add <title> [--exe <path>] [--publisher ..] [--image ..] [--save-folder ..]
//! playtime game list [--search ..] [--status ..] [--sort ..] [--desc] [--json]
//! playtime game show <game> [--json]
//! playtime game edit|delete <game> ...
//! playtime chapter add|list|current|delete ...
//! playtime session list|add|rename|chapter|delete ...
//! playtime sync [<game>] [--all] [--json]
//! playtime sync save upload|download <game> [--to <dir>]
//! playtime cloud list [--json]
//! playtime cloud delete <game>|--all
//! playtime status [--json]
//! playtime processes [--json]
//! playtime pause|resume|end|arm <game>
//! playtime auto-detect on|off
//! playtime offline on|off
//! playtime credential set|show
//! playtime daemon start|stop|status|logs
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    chapter::ChapterCommand,
    cloud::CloudCommand,
    control::{ControlArgs, ProcessesArgs, StatusArgs, SwitchArgs},
    credential::CredentialCommand,
    daemon::DaemonCommand,
    game::GameCommand,
    init::InitArgs,
    session::SessionCommand,
    sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "playtime",
    version,
    about = "Track play time of local games and sync it to cloud storage",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the data directory, default config and database.
    Init(InitArgs),

    /// Manage the game library.
    Game {
        #[command(subcommand)]
        command: GameCommand,
    },

    /// Manage the chapters of a game.
    Chapter {
        #[command(subcommand)]
        command: ChapterCommand,
    },

    /// Inspect and edit recorded play sessions.
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Reconcile the library with cloud storage, or move save folders.
    Sync(SyncArgs),

    /// Inspect or delete what the bucket holds.
    Cloud {
        #[command(subcommand)]
        command: CloudCommand,
    },

    /// Show what the daemon is currently tracking.
    Status(StatusArgs),

    /// List running processes as the monitor sees them.
    Processes(ProcessesArgs),

    /// Pause the running session of a game.
    Pause(ControlArgs),

    /// Resume a paused or pending session.
    Resume(ControlArgs),

    /// End the session of a game and record it.
    End(ControlArgs),

    /// Start monitoring a game explicitly.
    Arm(ControlArgs),

    /// Turn automatic detection of configured games on or off.
    AutoDetect(SwitchArgs),

    /// Turn offline mode on or off. Saved to config.yaml; applies to the
    /// daemon and to `sync` run from this command line.
    Offline(SwitchArgs),

    /// Manage cloud storage credentials.
    Credential {
        #[command(subcommand)]
        command: CredentialCommand,
    },

    /// Run and control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Daemon { .. }) {
        init_tracing();
    }
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Game { command } => commands::game::run(command),
        Commands::Chapter { command } => commands::chapter::run(command),
        Commands::Session { command } => commands::session::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Cloud { command } => commands::cloud::run(command),
        Commands::Status(args) => args.run(),
        Commands::Processes(args) => args.run(),
        Commands::Pause(args) => args.run("pause"),
        Commands::Resume(args) => args.run("resume"),
        Commands::End(args) => args.run("end"),
        Commands::Arm(args) => args.run("arm"),
        Commands::AutoDetect(args) => args.run("auto_detect"),
        Commands::Offline(args) => args.run("offline"),
        Commands::Credential { command } => commands::credential::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

/// Warnings only on stderr; `RUST_LOG` can raise it.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
