//! Domain types for the local play-time library.
//!
//! Identifiers are newtypes over ULID strings. Timestamps are `DateTime<Utc>`
//! and serialize as RFC 3339; JSON field names are camelCase so the same
//! structs can be shown to a UI or written to the cloud documents unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Executable path stored for games that only exist locally because they were
/// downloaded from the cloud. The local schema requires a non-empty path.
pub const UNCONFIGURED_EXE_PATH: &str = "__unconfigured__";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Fresh, time-ordered identifier.
            pub fn generate() -> Self {
                Self(ulid::Ulid::new().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Primary key of a game, shared between the local store and the cloud.
    GameId
);
string_id!(
    /// Primary key of a play session.
    SessionId
);
string_id!(ChapterId);

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How far the player has got with a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayStatus {
    #[default]
    Unplayed,
    Playing,
    Played,
}

impl PlayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayStatus::Unplayed => "unplayed",
            PlayStatus::Playing => "playing",
            PlayStatus::Played => "played",
        }
    }
}

impl fmt::Display for PlayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unplayed" => Ok(PlayStatus::Unplayed),
            "playing" => Ok(PlayStatus::Playing),
            "played" => Ok(PlayStatus::Played),
            other => Err(format!(
                "unknown play status '{other}'; expected: unplayed, playing, played"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A game row in the local library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: GameId,
    pub title: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    pub exe_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_folder_path: Option<String>,
    #[serde(default)]
    pub play_status: PlayStatus,
    /// Seconds; always the sum of the game's sessions after any write path.
    #[serde(default)]
    pub total_play_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_played: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_chapter: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    /// File name of the configured executable (`"game.exe"` for
    /// `C:\Games\Foo\game.exe`). Both separator styles are accepted so paths
    /// recorded on Windows still resolve on other hosts.
    pub fn exe_name(&self) -> &str {
        exe_file_name(&self.exe_path)
    }

    /// Whether the executable path is a real path rather than the download
    /// placeholder.
    pub fn has_configured_exe(&self) -> bool {
        let trimmed = self.exe_path.trim();
        !trimmed.is_empty() && trimmed != UNCONFIGURED_EXE_PATH
    }
}

/// Input for creating a game.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewGame {
    pub title: String,
    pub publisher: String,
    pub exe_path: String,
    pub image_path: Option<String>,
    pub save_folder_path: Option<String>,
    pub play_status: PlayStatus,
}

/// One completed play session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaySession {
    pub id: SessionId,
    pub game_id: GameId,
    pub played_at: DateTime<Utc>,
    /// Seconds, never negative.
    pub duration: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<ChapterId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Input for recording a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub game_id: GameId,
    pub played_at: DateTime<Utc>,
    pub duration: i64,
    pub session_name: Option<String>,
    pub chapter_id: Option<ChapterId>,
    pub upload_id: Option<String>,
}

/// A named chapter (route, act) inside a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: ChapterId,
    pub game_id: GameId,
    pub name: String,
    pub order: i64,
    pub created_at: DateTime<Utc>,
}

/// Sort column for [`GameFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameSort {
    #[default]
    Title,
    LastPlayed,
    TotalPlayTime,
    CreatedAt,
    UpdatedAt,
}

/// Search/filter/sort options for listing games.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameFilter {
    /// Case-insensitive substring of title or publisher.
    pub search: Option<String>,
    pub play_status: Option<PlayStatus>,
    pub sort: GameSort,
    pub descending: bool,
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Last component of `path`, splitting on both `/` and `\`.
pub fn exe_file_name(path: &str) -> &str {
    let trimmed = path.trim();
    match trimmed.rfind(['/', '\\']) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Everything before the last separator of `path`, or `""` for a bare name.
pub fn exe_dir(path: &str) -> &str {
    let trimmed = path.trim();
    match trimmed.rfind(['/', '\\']) {
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
