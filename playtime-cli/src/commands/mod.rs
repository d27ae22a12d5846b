//! Subcommand implementations and the helpers they share.

pub mod chapter;
pub mod cloud;
pub mod control;
pub mod credential;
pub mod daemon;
pub mod game;
pub mod init;
pub mod session;
pub mod sync;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use playtime_core::{Config, Game, GameFilter, GameId, Repository, SqliteRepository};

/// Data directory and effective configuration for this invocation.
pub struct Env {
    pub data_dir: PathBuf,
    pub config: Config,
}

impl Env {
    pub fn load() -> Result<Self> {
        let (data_dir, config) = Config::load().context("failed to load configuration")?;
        tracing::debug!(data_dir = %data_dir.display(), "loaded configuration");
        Ok(Self { data_dir, config })
    }

    pub fn open_repo(&self) -> Result<SqliteRepository> {
        let path = self.config.db_path(&self.data_dir);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        SqliteRepository::new(&path)
            .with_context(|| format!("failed to open database {}", path.display()))
    }
}

/// Find a game by id, or by case-insensitive exact title.
pub fn resolve_game(repo: &dyn Repository, needle: &str) -> Result<Game> {
    let needle = needle.trim();
    if needle.is_empty() {
        bail!("game id or title is empty");
    }
    if let Some(game) = repo.get_game(&GameId::from(needle))? {
        return Ok(game);
    }
    let filter = GameFilter {
        search: Some(needle.to_string()),
        ..GameFilter::default()
    };
    let mut matches: Vec<Game> = repo
        .list_games(&filter)?
        .into_iter()
        .filter(|g| g.title.eq_ignore_ascii_case(needle))
        .collect();
    match matches.len() {
        0 => bail!("no game with id or title '{needle}'"),
        1 => Ok(matches.remove(0)),
        n => bail!("{n} games are titled '{needle}'; use the game id"),
    }
}

/// `3725` -> `1h 02m`, `125` -> `2m 05s`, `9` -> `9s`.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (h, m, s) = (seconds / 3600, seconds % 3600 / 60, seconds % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Seconds from `90`, `90s`, `45m`, `1h30m` or `2h 5m 10s`.
pub fn parse_duration(input: &str) -> Result<i64, String> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err("duration is empty".into());
    }
    if let Ok(secs) = compact.parse::<i64>() {
        return if secs >= 0 {
            Ok(secs)
        } else {
            Err("duration must not be negative".into())
        };
    }
    let mut total = 0i64;
    let mut digits = String::new();
    for c in compact.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c.to_ascii_lowercase() {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            other => return Err(format!("unknown duration unit '{other}'")),
        };
        let value: i64 = digits
            .parse()
            .map_err(|_| format!("missing number before '{c}' in '{input}'"))?;
        total += value * unit;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(format!("trailing number without unit in '{input}'"));
    }
    Ok(total)
}

/// `on`/`off` style switches.
pub fn parse_switch(input: &str) -> Result<bool, String> {
    match input.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        other => Err(format!("expected on or off, got '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_format_compactly() {
        assert_eq!(format_duration(9), "9s");
        assert_eq!(format_duration(125), "2m 05s");
        assert_eq!(format_duration(3725), "1h 02m");
        assert_eq!(format_duration(-4), "0s");
    }

    #[test]
    fn durations_parse_with_units() {
        assert_eq!(parse_duration("90"), Ok(90));
        assert_eq!(parse_duration("45m"), Ok(2700));
        assert_eq!(parse_duration("1h30m"), Ok(5400));
        assert_eq!(parse_duration("2h 5m 10s"), Ok(7510));
        assert!(parse_duration("-5").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("1h30").is_err());
        assert!(parse_duration("h").is_err());
    }

    #[test]
    fn switches() {
        assert_eq!(parse_switch("ON"), Ok(true));
        assert_eq!(parse_switch("off"), Ok(false));
        assert!(parse_switch("maybe").is_err());
    }
}
