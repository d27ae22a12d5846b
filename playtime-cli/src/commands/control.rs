//! Commands that talk to the running daemon: `status`, `processes`,
//! `pause|resume|end|arm <game>`, `auto-detect` and `offline`. The two
//! switches also persist to `config.yaml` and work without a daemon.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use playtime_core::Config;
use playtime_daemon::{request, DaemonError, DaemonRequest};
use playtime_monitor::{FallbackEnumerator, GameStatus, ProcessSnapshot};

use super::{format_duration, parse_switch, resolve_game, Env};

/// Arguments for `playtime status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "title")]
    title: String,
    #[tabled(rename = "executable")]
    exe: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "this session")]
    played: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let env = Env::load()?;
        let status = match request(&env.data_dir, &DaemonRequest::new("status")) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                if self.json {
                    println!("{}", serde_json::json!({ "running": false }));
                } else {
                    println!("daemon is not running");
                }
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        let games: Vec<GameStatus> =
            serde_json::from_value(status["games"].clone()).context("malformed daemon status")?;
        println!(
            "daemon running · monitoring {} · auto-detect {} · {}",
            on_off(&status["monitoring"]),
            on_off(&status["autoDetection"]),
            if status["offline"].as_bool().unwrap_or(false) {
                "offline".yellow().to_string()
            } else {
                "online".green().to_string()
            }
        );
        if games.is_empty() {
            println!("No games are being tracked.");
            return Ok(());
        }
        let rows = games.iter().map(|g| StatusRow {
            title: g.title.clone(),
            exe: g.executable_name.clone(),
            state: state_label(g),
            played: format_duration(g.play_seconds),
        });
        println!("{}", Table::new(rows).with(Style::rounded()));
        Ok(())
    }
}

fn on_off(value: &Value) -> String {
    if value.as_bool().unwrap_or(false) {
        "on".green().to_string()
    } else {
        "off".dimmed().to_string()
    }
}

fn state_label(g: &GameStatus) -> String {
    if g.needs_resume {
        "paused · running again".yellow().to_string()
    } else if g.is_paused {
        "paused".yellow().to_string()
    } else if g.needs_confirmation {
        "ended? confirm with `playtime end`".magenta().to_string()
    } else if g.is_playing {
        "playing".green().to_string()
    } else {
        "idle".dimmed().to_string()
    }
}

/// Arguments for `playtime processes`.
#[derive(Args, Debug)]
pub struct ProcessesArgs {
    /// Only show processes whose name contains this text.
    #[arg(long)]
    pub filter: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ProcessRow {
    #[tabled(rename = "pid")]
    pid: u32,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "command")]
    cmd: String,
}

impl ProcessesArgs {
    pub fn run(self) -> Result<()> {
        let env = Env::load()?;
        // Ask the daemon so the output matches what it matches against;
        // enumerate locally when it is not running.
        let mut snapshot: ProcessSnapshot =
            match request(&env.data_dir, &DaemonRequest::new("processes")) {
                Ok(value) => serde_json::from_value(value).context("malformed process snapshot")?,
                Err(DaemonError::DaemonNotRunning { .. }) => {
                    FallbackEnumerator::system(env.config.monitor.enumeration_timeout())
                        .enumerate()
                        .into()
                }
                Err(err) => return Err(err).context("failed to list processes"),
            };

        if let Some(filter) = self.filter.as_deref().map(str::to_lowercase) {
            snapshot
                .items
                .retain(|p| p.name.to_lowercase().contains(&filter));
        }
        if self.json {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            return Ok(());
        }
        let rows = snapshot.items.iter().map(|p| ProcessRow {
            pid: p.pid,
            name: p.name.clone(),
            cmd: p.cmd.clone(),
        });
        println!("{}", Table::new(rows).with(Style::rounded()));
        println!("source: {}", snapshot.source.as_str());
        Ok(())
    }
}

/// `<game>` argument shared by pause, resume, end and arm.
#[derive(Args, Debug)]
pub struct ControlArgs {
    /// Game id or exact title.
    pub game: String,
}

impl ControlArgs {
    pub fn run(self, cmd: &str) -> Result<()> {
        let env = Env::load()?;
        let repo = env.open_repo()?;
        let game = resolve_game(&repo, &self.game)?;
        let data = daemon_request(
            &env,
            DaemonRequest::new(cmd).with_game(game.id.as_str()),
        )?;

        let (field, done, not_done) = match cmd {
            "pause" => ("paused", "paused", "has no running session to pause"),
            "resume" => ("resumed", "resumed", "is not paused, or its process is not running"),
            "end" => ("ended", "session ended and recorded", "is not being tracked"),
            _ => ("armed", "now monitored", "was already monitored"),
        };
        if data[field].as_bool().unwrap_or(false) {
            println!("✓ '{}' {done}", game.title);
        } else {
            println!("  '{}' {not_done}", game.title);
        }
        Ok(())
    }
}

/// `on|off` argument for `auto-detect` and `offline`.
#[derive(Args, Debug)]
pub struct SwitchArgs {
    #[arg(value_parser = parse_switch, action = clap::ArgAction::Set)]
    pub enabled: bool,
}

impl SwitchArgs {
    /// Persist the switch to `config.yaml`, then apply it to the running
    /// daemon if there is one. Environment overrides are not written back.
    pub fn run(self, cmd: &str) -> Result<()> {
        let env = Env::load()?;
        let mut stored = Config::load_from(&env.data_dir).context("failed to read config.yaml")?;
        match cmd {
            "offline" => stored.cloud.offline = self.enabled,
            _ => stored.monitor.auto_detect = self.enabled,
        }
        stored
            .save_to(&env.data_dir)
            .context("failed to write config.yaml")?;

        let label = if cmd == "offline" { "offline mode" } else { "auto-detection" };
        let state = if self.enabled { "on" } else { "off" };
        match request(&env.data_dir, &DaemonRequest::new(cmd).with_enabled(self.enabled)) {
            Ok(_) => println!("✓ {label} {state}"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("✓ {label} {state} (saved; daemon is not running)")
            }
            Err(err) => {
                return Err(err).with_context(|| format!("saved {label}, but the daemon rejected it"))
            }
        }
        Ok(())
    }
}

fn daemon_request(env: &Env, req: DaemonRequest) -> Result<Value> {
    match request(&env.data_dir, &req) {
        Ok(data) => Ok(data),
        Err(DaemonError::DaemonNotRunning { .. }) => {
            anyhow::bail!("daemon is not running; start it with `playtime daemon start`")
        }
        Err(DaemonError::Remote { message, detail }) => match detail {
            Some(detail) => anyhow::bail!("{message} ({detail})"),
            None => anyhow::bail!("{message}"),
        },
        Err(err) => Err(err).with_context(|| format!("'{}' request failed", req.cmd)),
    }
}
