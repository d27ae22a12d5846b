//! `playtime sync [<game>] [--all]` and `playtime sync save upload|download <game>`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use playtime_core::{FileCredentialStore, GameId, Repository};
use playtime_daemon::{request, DaemonError, DaemonRequest};
use playtime_sync::{DefaultConnector, S3Options, SaveTransfer, SyncEngine, SyncError, SyncSummary};

use super::{resolve_game, Env};

/// Arguments for `playtime sync`.
#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub command: Option<SyncCommand>,

    /// Game id or exact title (omit when using `--all`).
    pub game: Option<String>,

    /// Reconcile every game.
    #[arg(long, conflicts_with = "game")]
    pub all: bool,

    /// Credential entry to use instead of the configured one. Runs in this
    /// process even when the daemon is up.
    #[arg(long)]
    pub credential: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum SyncCommand {
    /// Back up or restore a game's save folder.
    Save {
        #[command(subcommand)]
        command: SaveCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum SaveCommand {
    /// Upload the save folder unless it is unchanged since the last upload.
    Upload(SaveArgs),
    /// Restore the save folder from the cloud.
    Download(DownloadArgs),
}

#[derive(Args, Debug)]
pub struct SaveArgs {
    /// Game id or exact title.
    pub game: String,

    #[arg(long)]
    pub credential: Option<String>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub save: SaveArgs,

    /// Restore here instead of the game's configured save folder.
    #[arg(long)]
    pub to: Option<PathBuf>,
}

/// Engine for work done in this process, honouring the persisted offline
/// setting and the configured S3 addressing.
pub fn local_engine(env: &Env, repo: Arc<dyn Repository>) -> SyncEngine {
    let engine = SyncEngine::new(
        repo,
        Arc::new(FileCredentialStore::in_dir(&env.data_dir)),
        Arc::new(DefaultConnector::new(S3Options::from_config(&env.config.cloud))),
        &env.data_dir,
        env.config.metadata_key(),
    );
    engine.set_offline_mode(env.config.cloud.offline);
    engine
}

pub fn sync_failure(err: SyncError) -> anyhow::Error {
    anyhow::anyhow!("{} ({}): {err}", err.message(), err.detail())
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let env = Env::load()?;
        if let Some(SyncCommand::Save { command }) = self.command {
            return run_save(&env, command);
        }

        let repo = Arc::new(env.open_repo()?);
        let scope = match (self.game.as_deref(), self.all) {
            (Some(game), _) => Some(resolve_game(repo.as_ref(), game)?.id),
            (None, true) => None,
            (None, false) => bail!("provide a game or use --all"),
        };

        let from_daemon = match self.credential {
            Some(_) => None,
            None => sync_via_daemon(&env, scope.as_ref())?,
        };
        let summary = match from_daemon {
            Some(summary) => summary,
            None => {
                let engine = local_engine(&env, repo);
                let key = self
                    .credential
                    .unwrap_or_else(|| env.config.credential_key().to_string());
                let outcome = match &scope {
                    Some(id) => engine.sync_game(&key, id),
                    None => engine.sync_all(&key),
                };
                outcome.map_err(sync_failure)?
            }
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_summary(&summary);
        }
        Ok(())
    }
}

/// Ask the running daemon to sync so its engine state (offline mode, run
/// serialization) applies. `None` when no daemon is running.
fn sync_via_daemon(env: &Env, scope: Option<&GameId>) -> Result<Option<SyncSummary>> {
    let mut req = DaemonRequest::new("sync");
    if let Some(id) = scope {
        req = req.with_game(id.as_str());
    }
    match request(&env.data_dir, &req) {
        Ok(data) => {
            tracing::debug!("sync handled by daemon");
            Ok(Some(serde_json::from_value(data).context("malformed sync summary")?))
        }
        Err(DaemonError::DaemonNotRunning { .. }) => Ok(None),
        Err(DaemonError::Remote { message, detail }) => match detail {
            Some(detail) => bail!("{message} ({detail})"),
            None => bail!("{message}"),
        },
        Err(err) => Err(err).context("'sync' request failed"),
    }
}

fn run_save(env: &Env, command: SaveCommand) -> Result<()> {
    let repo = Arc::new(env.open_repo()?);
    let (args, target, upload) = match command {
        SaveCommand::Upload(args) => (args, None, true),
        SaveCommand::Download(args) => (args.save, args.to, false),
    };
    let game = resolve_game(repo.as_ref(), &args.game)?;
    let engine = local_engine(env, repo);
    let key = args
        .credential
        .unwrap_or_else(|| env.config.credential_key().to_string());

    let transfer: SaveTransfer = if upload {
        engine.upload_save_data(&key, &game.id)
    } else {
        engine.download_save_data(&key, &game.id, target.as_deref())
    }
    .map_err(sync_failure)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&transfer)?);
    } else if transfer.skipped {
        println!("✓ Save data of '{}' is unchanged; nothing uploaded", game.title);
    } else {
        println!(
            "✓ {} {} file(s), {} bytes for '{}'",
            if upload { "Uploaded" } else { "Restored" },
            transfer.files,
            transfer.bytes,
            game.title
        );
    }
    Ok(())
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "")]
    what: &'static str,
    #[tabled(rename = "uploaded")]
    uploaded: usize,
    #[tabled(rename = "downloaded")]
    downloaded: usize,
}

fn print_summary(summary: &SyncSummary) {
    let rows = [
        CountRow {
            what: "games",
            uploaded: summary.uploaded_games,
            downloaded: summary.downloaded_games,
        },
        CountRow {
            what: "sessions",
            uploaded: summary.uploaded_sessions,
            downloaded: summary.downloaded_sessions,
        },
        CountRow {
            what: "images",
            uploaded: summary.uploaded_images,
            downloaded: summary.downloaded_images,
        },
    ];
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!("{} {} unchanged", "✓".green(), summary.skipped_games);
    if summary.invalid_records > 0 {
        println!(
            "{}",
            format!(
                "! {} remote record(s) could not be read and were left untouched",
                summary.invalid_records
            )
            .yellow()
        );
    }
}
