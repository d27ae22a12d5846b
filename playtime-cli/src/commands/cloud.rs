//! `playtime cloud list|delete`

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use playtime_core::{GameId, Repository};

use super::sync::{local_engine, sync_failure};
use super::{resolve_game, Env};

#[derive(Subcommand, Debug)]
pub enum CloudCommand {
    /// Show what the bucket holds, grouped per game.
    List(ListArgs),
    /// Delete a game's cloud data, or everything with `--all`.
    Delete(DeleteArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub credential: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Game id or exact title.
    #[arg(required_unless_present = "all")]
    pub game: Option<String>,

    /// Empty the whole bucket.
    #[arg(long, conflicts_with = "game")]
    pub all: bool,

    #[arg(long)]
    pub credential: Option<String>,
}

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "title")]
    title: String,
    #[tabled(rename = "files")]
    files: usize,
    #[tabled(rename = "size")]
    size: String,
    #[tabled(rename = "last modified")]
    modified: String,
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn is_plain_id(needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && !needle.contains(['/', '\\', '*']) && needle != "." && needle != ".."
}

pub fn run(command: CloudCommand) -> Result<()> {
    let env = Env::load()?;
    let repo = Arc::new(env.open_repo()?);
    let engine = local_engine(&env, repo.clone());
    let key_or_default = |key: Option<String>| {
        key.unwrap_or_else(|| env.config.credential_key().to_string())
    };

    match command {
        CloudCommand::List(args) => {
            let items = engine
                .list_cloud_data(&key_or_default(args.credential))
                .map_err(sync_failure)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&items)?);
                return Ok(());
            }
            if items.is_empty() {
                println!("The bucket is empty.");
                return Ok(());
            }
            let rows = items.iter().map(|item| {
                let title = item
                    .remote_path
                    .strip_prefix("games/")
                    .and_then(|id| repo.get_game(&GameId::from(id)).ok().flatten())
                    .map(|g| g.title)
                    .unwrap_or_default();
                ItemRow {
                    name: item.name.clone(),
                    title,
                    files: item.file_count,
                    size: format_size(item.total_size),
                    modified: item
                        .last_modified
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default(),
                }
            });
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
        CloudCommand::Delete(args) => {
            let (path, label) = match (args.game.as_deref(), args.all) {
                (_, true) => ("*".to_string(), "everything".to_string()),
                (Some(needle), false) => match resolve_game(repo.as_ref(), needle) {
                    Ok(game) => (format!("games/{}", game.id), format!("'{}'", game.title)),
                    // Data of games this machine never had is addressed by id.
                    Err(_) if is_plain_id(needle) => {
                        (format!("games/{}", needle.trim()), needle.trim().to_string())
                    }
                    Err(err) => return Err(err),
                },
                (None, false) => bail!("provide a game or use --all"),
            };
            let removed = engine
                .delete_cloud_data(&key_or_default(args.credential), &path)
                .map_err(sync_failure)?;
            if removed == 0 {
                println!("{}", format!("Nothing stored for {label}.").dimmed());
            } else {
                println!("✓ Deleted {removed} object(s) for {label}");
            }
        }
    }
    Ok(())
}
