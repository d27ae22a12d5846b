//! `playtime game add|list|show|edit|delete`

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use playtime_core::{
    Chapter, Game, GameFilter, GameSort, NewGame, PlayStatus, PlaySession, Repository,
    UNCONFIGURED_EXE_PATH,
};

use super::{format_duration, resolve_game, Env};

#[derive(Subcommand, Debug)]
pub enum GameCommand {
    /// Register a game.
    Add(AddArgs),
    /// List games.
    List(ListArgs),
    /// Show one game with its chapters and recent sessions.
    Show(ShowArgs),
    /// Change the editable fields of a game.
    Edit(EditArgs),
    /// Remove a game with its sessions and chapters.
    Delete(DeleteArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub title: String,

    /// Path of the game executable. Without it the game is only tracked
    /// manually until one is set.
    #[arg(long)]
    pub exe: Option<String>,

    #[arg(long, default_value = "")]
    pub publisher: String,

    /// Cover image file.
    #[arg(long)]
    pub image: Option<String>,

    #[arg(long)]
    pub save_folder: Option<String>,

    /// unplayed | playing | played
    #[arg(long, default_value = "unplayed")]
    pub status: PlayStatus,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SortArg {
    Title,
    LastPlayed,
    Total,
    Created,
    Updated,
}

impl From<SortArg> for GameSort {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Title => GameSort::Title,
            SortArg::LastPlayed => GameSort::LastPlayed,
            SortArg::Total => GameSort::TotalPlayTime,
            SortArg::Created => GameSort::CreatedAt,
            SortArg::Updated => GameSort::UpdatedAt,
        }
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Substring of title or publisher.
    #[arg(long)]
    pub search: Option<String>,

    #[arg(long)]
    pub status: Option<PlayStatus>,

    #[arg(long, value_enum, default_value_t = SortArg::Title)]
    pub sort: SortArg,

    #[arg(long)]
    pub desc: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Game id or exact title.
    pub game: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    /// Game id or exact title.
    pub game: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub publisher: Option<String>,

    #[arg(long)]
    pub exe: Option<String>,

    #[arg(long)]
    pub image: Option<String>,

    #[arg(long)]
    pub save_folder: Option<String>,

    #[arg(long)]
    pub status: Option<PlayStatus>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Game id or exact title.
    pub game: String,
}

pub fn run(command: GameCommand) -> Result<()> {
    let env = Env::load()?;
    let repo = env.open_repo()?;
    match command {
        GameCommand::Add(args) => add(&repo, args),
        GameCommand::List(args) => list(&repo, args),
        GameCommand::Show(args) => show(&repo, args),
        GameCommand::Edit(args) => edit(&repo, args),
        GameCommand::Delete(args) => delete(&repo, args),
    }
}

fn add(repo: &dyn Repository, args: AddArgs) -> Result<()> {
    let game = repo
        .create_game(NewGame {
            title: args.title,
            publisher: args.publisher,
            exe_path: args.exe.unwrap_or_else(|| UNCONFIGURED_EXE_PATH.to_string()),
            image_path: args.image,
            save_folder_path: args.save_folder,
            play_status: args.status,
        })
        .context("failed to add game")?;
    println!("✓ Added '{}' ({})", game.title, game.id);
    if !game.has_configured_exe() {
        println!(
            "  {}",
            "No executable set; automatic tracking is off for this game.".yellow()
        );
    }
    Ok(())
}

#[derive(Tabled)]
struct GameRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "title")]
    title: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "play time")]
    play_time: String,
    #[tabled(rename = "last played")]
    last_played: String,
    #[tabled(rename = "executable")]
    exe: String,
}

fn list(repo: &dyn Repository, args: ListArgs) -> Result<()> {
    let games = repo
        .list_games(&GameFilter {
            search: args.search,
            play_status: args.status,
            sort: args.sort.into(),
            descending: args.desc,
        })
        .context("failed to list games")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&games)?);
        return Ok(());
    }
    if games.is_empty() {
        println!("No games yet. Add one with `playtime game add <title> --exe <path>`.");
        return Ok(());
    }

    let rows = games.iter().map(|g| GameRow {
        id: g.id.to_string(),
        title: g.title.clone(),
        status: status_label(g.play_status),
        play_time: format_duration(g.total_play_time),
        last_played: g
            .last_played
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string()),
        exe: if g.has_configured_exe() {
            g.exe_name().to_string()
        } else {
            "-".dimmed().to_string()
        },
    });
    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GameDetail {
    #[serde(flatten)]
    game: Game,
    chapters: Vec<Chapter>,
    sessions: Vec<PlaySession>,
}

fn show(repo: &dyn Repository, args: ShowArgs) -> Result<()> {
    let game = resolve_game(repo, &args.game)?;
    let chapters = repo.list_chapters(&game.id)?;
    let sessions = repo.list_sessions(&game.id)?;

    if args.json {
        let detail = GameDetail {
            game,
            chapters,
            sessions,
        };
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    println!("{} {}", game.title.bold(), format!("({})", game.id).dimmed());
    if !game.publisher.is_empty() {
        println!("  publisher:   {}", game.publisher);
    }
    println!("  status:      {}", status_label(game.play_status));
    println!("  play time:   {}", format_duration(game.total_play_time));
    println!("  sessions:    {}", sessions.len());
    println!(
        "  executable:  {}",
        if game.has_configured_exe() {
            game.exe_path.as_str()
        } else {
            "(not set)"
        }
    );
    if let Some(folder) = &game.save_folder_path {
        println!("  save folder: {folder}");
    }
    if let Some(image) = &game.image_path {
        println!("  image:       {image}");
    }
    if !chapters.is_empty() {
        let names: Vec<&str> = chapters.iter().map(|c| c.name.as_str()).collect();
        println!("  chapters:    {}", names.join(", "));
    }
    Ok(())
}

fn edit(repo: &dyn Repository, args: EditArgs) -> Result<()> {
    let mut game = resolve_game(repo, &args.game)?;
    if let Some(title) = args.title {
        game.title = title;
    }
    if let Some(publisher) = args.publisher {
        game.publisher = publisher;
    }
    if let Some(exe) = args.exe {
        game.exe_path = exe;
    }
    if let Some(image) = args.image {
        game.image_path = Some(image).filter(|p| !p.is_empty());
    }
    if let Some(folder) = args.save_folder {
        game.save_folder_path = Some(folder).filter(|p| !p.is_empty());
    }
    if let Some(status) = args.status {
        game.play_status = status;
    }
    let game = repo.update_game(&game).context("failed to update game")?;
    println!("✓ Updated '{}'", game.title);
    Ok(())
}

fn delete(repo: &dyn Repository, args: DeleteArgs) -> Result<()> {
    let game = resolve_game(repo, &args.game)?;
    repo.delete_game(&game.id).context("failed to delete game")?;
    println!("✓ Deleted '{}' ({})", game.title, game.id);
    Ok(())
}

fn status_label(status: PlayStatus) -> String {
    match status {
        PlayStatus::Unplayed => status.as_str().dimmed().to_string(),
        PlayStatus::Playing => status.as_str().cyan().to_string(),
        PlayStatus::Played => status.as_str().green().to_string(),
    }
}
