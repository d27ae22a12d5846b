//! `playtime chapter add|list|current|delete`

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use playtime_core::{Chapter, ChapterId, Game, Repository};

use super::{resolve_game, Env};

#[derive(Subcommand, Debug)]
pub enum ChapterCommand {
    /// Append a chapter to a game.
    Add(AddArgs),
    /// List the chapters of a game in order.
    List(ListArgs),
    /// Mark the chapter the player is currently in.
    Current(CurrentArgs),
    /// Delete a chapter. Its sessions stay, unassigned.
    Delete(DeleteArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Game id or exact title.
    pub game: String,
    pub name: String,
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
pub struct CurrentArgs {
    /// Game id or exact title.
    pub game: String,

    /// Chapter id or name. Omit to clear.
    pub chapter: Option<String>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    pub chapter: String,
}

pub fn run(command: ChapterCommand) -> Result<()> {
    let env = Env::load()?;
    let repo = env.open_repo()?;
    match command {
        ChapterCommand::Add(args) => add(&repo, args),
        ChapterCommand::List(args) => list(&repo, args),
        ChapterCommand::Current(args) => current(&repo, args),
        ChapterCommand::Delete(args) => delete(&repo, args),
    }
}

/// Find a chapter of `game` by id, or by case-insensitive name.
pub fn resolve_chapter(repo: &dyn Repository, game: &Game, needle: &str) -> Result<Chapter> {
    let needle = needle.trim();
    let chapters = repo.list_chapters(&game.id)?;
    let mut matches: Vec<Chapter> = chapters
        .iter()
        .filter(|c| c.id.as_str() == needle)
        .cloned()
        .collect();
    if matches.is_empty() {
        matches = chapters
            .into_iter()
            .filter(|c| c.name.eq_ignore_ascii_case(needle))
            .collect();
    }
    match matches.len() {
        0 => bail!("'{}' has no chapter '{needle}'", game.title),
        1 => Ok(matches.remove(0)),
        n => bail!("{n} chapters are named '{needle}'; use the chapter id"),
    }
}

fn add(repo: &dyn Repository, args: AddArgs) -> Result<()> {
    let game = resolve_game(repo, &args.game)?;
    let chapter = repo
        .create_chapter(&game.id, &args.name)
        .context("failed to add chapter")?;
    println!(
        "✓ Added chapter {} '{}' to '{}' ({})",
        chapter.order, chapter.name, game.title, chapter.id
    );
    Ok(())
}

#[derive(Tabled)]
struct ChapterRow {
    #[tabled(rename = "#")]
    order: i64,
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "current")]
    current: String,
}

fn list(repo: &dyn Repository, args: ListArgs) -> Result<()> {
    let game = resolve_game(repo, &args.game)?;
    let chapters = repo.list_chapters(&game.id)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&chapters)?);
        return Ok(());
    }
    if chapters.is_empty() {
        println!("No chapters for '{}'.", game.title);
        return Ok(());
    }
    let current = game.current_chapter.as_deref();
    let rows = chapters.iter().map(|c| ChapterRow {
        order: c.order,
        id: c.id.to_string(),
        name: c.name.clone(),
        current: if current == Some(c.id.as_str()) {
            "●".green().to_string()
        } else {
            String::new()
        },
    });
    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}

fn current(repo: &dyn Repository, args: CurrentArgs) -> Result<()> {
    let mut game = resolve_game(repo, &args.game)?;
    let chapter = match args.chapter.as_deref() {
        Some(needle) => Some(resolve_chapter(repo, &game, needle)?),
        None => None,
    };
    game.current_chapter = chapter.as_ref().map(|c| c.id.to_string());
    let game = repo.update_game(&game).context("failed to update game")?;
    match chapter {
        Some(c) => println!("✓ '{}' is now in chapter '{}'", game.title, c.name),
        None => println!("✓ Cleared the current chapter of '{}'", game.title),
    }
    Ok(())
}

fn delete(repo: &dyn Repository, args: DeleteArgs) -> Result<()> {
    let id = ChapterId::from(args.chapter.trim());
    let Some(chapter) = repo.get_chapter(&id)? else {
        bail!("no chapter with id '{id}'");
    };
    repo.delete_chapter(&id)?;
    if let Some(mut game) = repo.get_game(&chapter.game_id)? {
        if game.current_chapter.as_deref() == Some(id.as_str()) {
            game.current_chapter = None;
            repo.update_game(&game)?;
        }
    }
    println!("✓ Deleted chapter '{}'", chapter.name);
    Ok(())
}
