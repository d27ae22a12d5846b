//! `playtime session list|add|rename|chapter|delete`
//!
//! Adding or deleting a session recomputes the game's total play time and
//! bumps its `updatedAt`, so the change wins the next sync.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use playtime_core::repository::{record_session, refresh_totals, remove_session};
use playtime_core::{NewSession, Repository, SessionId};

use super::chapter::resolve_chapter;
use super::{format_duration, parse_duration, resolve_game, Env};

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// List the sessions of a game, newest first.
    List(ListArgs),
    /// Record a session by hand.
    Add(AddArgs),
    /// Set or clear the name of a session.
    Rename(RenameArgs),
    /// Assign a session to a chapter of its game, or clear it.
    Chapter(ChapterArgs),
    /// Delete a session.
    Delete(DeleteArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Game id or exact title.
    pub game: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Game id or exact title.
    pub game: String,

    /// Length of the session: `5400`, `90m`, `1h30m`.
    #[arg(long, value_parser = parse_duration)]
    pub duration: i64,

    /// When the session started (RFC 3339). Defaults to `now - duration`.
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,

    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct RenameArgs {
    pub session: String,

    /// New name; omit to clear it.
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct ChapterArgs {
    pub session: String,

    /// Chapter id or name.
    #[arg(required_unless_present = "clear")]
    pub chapter: Option<String>,

    /// Remove the session from its chapter.
    #[arg(long, conflicts_with = "chapter")]
    pub clear: bool,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    pub session: String,
}

pub fn run(command: SessionCommand) -> Result<()> {
    let env = Env::load()?;
    let repo = env.open_repo()?;
    match command {
        SessionCommand::List(args) => list(&repo, args),
        SessionCommand::Add(args) => add(&repo, args),
        SessionCommand::Rename(args) => rename(&repo, args),
        SessionCommand::Chapter(args) => assign_chapter(&repo, args),
        SessionCommand::Delete(args) => delete(&repo, args),
    }
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "played at")]
    played_at: String,
    #[tabled(rename = "duration")]
    duration: String,
    #[tabled(rename = "name")]
    name: String,
}

fn list(repo: &dyn Repository, args: ListArgs) -> Result<()> {
    let game = resolve_game(repo, &args.game)?;
    let sessions = repo.list_sessions(&game.id)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sessions recorded for '{}'.", game.title);
        return Ok(());
    }
    let rows = sessions.iter().map(|s| SessionRow {
        id: s.id.to_string(),
        played_at: s.played_at.format("%Y-%m-%d %H:%M").to_string(),
        duration: format_duration(s.duration),
        name: s.session_name.clone().unwrap_or_default(),
    });
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!(
        "{} {}",
        "total".bold(),
        format_duration(game.total_play_time)
    );
    Ok(())
}

fn add(repo: &dyn Repository, args: AddArgs) -> Result<()> {
    let game = resolve_game(repo, &args.game)?;
    let now = Utc::now();
    let played_at = args
        .at
        .unwrap_or_else(|| now - Duration::seconds(args.duration));
    let session = record_session(
        repo,
        NewSession {
            game_id: game.id.clone(),
            played_at,
            duration: args.duration,
            session_name: args.name.filter(|n| !n.trim().is_empty()),
            chapter_id: None,
            upload_id: None,
        },
        now,
    )
    .context("failed to record session")?;
    println!(
        "✓ Recorded {} for '{}' ({})",
        format_duration(session.duration),
        game.title,
        session.id
    );
    Ok(())
}

fn rename(repo: &dyn Repository, args: RenameArgs) -> Result<()> {
    let id = SessionId::from(args.session.trim());
    let name = args.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    if !repo.update_session_name(&id, name)? {
        bail!("no session with id '{id}'");
    }
    match name {
        Some(name) => println!("✓ Renamed session {id} to '{name}'"),
        None => println!("✓ Cleared the name of session {id}"),
    }
    Ok(())
}

fn assign_chapter(repo: &dyn Repository, args: ChapterArgs) -> Result<()> {
    let id = SessionId::from(args.session.trim());
    let Some(session) = repo.get_session(&id)? else {
        bail!("no session with id '{id}'");
    };
    let chapter = match args.chapter.as_deref().filter(|_| !args.clear) {
        Some(needle) => {
            let game = resolve_game(repo, session.game_id.as_str())?;
            Some(resolve_chapter(repo, &game, needle)?)
        }
        None => None,
    };
    repo.update_session_chapter(&id, chapter.as_ref().map(|c| &c.id))?;
    refresh_totals(repo, &session.game_id, None, Utc::now())?;
    match chapter {
        Some(c) => println!("✓ Session {id} is now in chapter '{}'", c.name),
        None => println!("✓ Session {id} has no chapter"),
    }
    Ok(())
}

fn delete(repo: &dyn Repository, args: DeleteArgs) -> Result<()> {
    let id = SessionId::from(args.session.trim());
    if !remove_session(repo, &id, Utc::now())? {
        bail!("no session with id '{id}'");
    }
    println!("✓ Deleted session {id}");
    Ok(())
}
