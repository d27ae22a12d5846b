//! Local game library backed by SQLite.
//!
//! [`Repository`] is the seam the monitor and the sync engine depend on;
//! [`SqliteRepository`] is the only implementation. It owns one connection
//! (WAL, 5 s busy timeout, foreign keys on) behind a mutex, so one instance
//! can be shared between the monitor loop, detached sync tasks and the CLI.
//! Other processes opening the same file are arbitrated by SQLite itself.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (nanosecond
//! precision, `Z` suffix) so lexical order equals chronological order.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::error::{io_err, RepositoryError};
use crate::types::{
    Chapter, ChapterId, Game, GameFilter, GameId, GameSort, NewGame, NewSession, PlaySession,
    PlayStatus, SessionId,
};

/// CRUD and aggregate queries over games, sessions and chapters.
pub trait Repository: Send + Sync {
    fn get_game(&self, id: &GameId) -> Result<Option<Game>, RepositoryError>;
    fn list_games(&self, filter: &GameFilter) -> Result<Vec<Game>, RepositoryError>;
    fn create_game(&self, new: NewGame) -> Result<Game, RepositoryError>;
    /// Overwrite the editable columns of an existing game and bump `updated_at`.
    fn update_game(&self, game: &Game) -> Result<Game, RepositoryError>;
    /// Insert or fully replace a game row, keeping every timestamp as given.
    fn upsert_game_by_id(&self, game: &Game) -> Result<(), RepositoryError>;
    fn touch_game_updated_at(&self, id: &GameId, at: DateTime<Utc>)
        -> Result<(), RepositoryError>;
    /// Set the cached total; `last_played` is only written when `Some`.
    /// Leaves `updated_at` alone.
    fn update_total_play_time(
        &self,
        id: &GameId,
        total_seconds: i64,
        last_played: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError>;
    fn delete_game(&self, id: &GameId) -> Result<bool, RepositoryError>;

    fn create_session(&self, new: NewSession) -> Result<PlaySession, RepositoryError>;
    fn get_session(&self, id: &SessionId) -> Result<Option<PlaySession>, RepositoryError>;
    /// Newest first.
    fn list_sessions(&self, game_id: &GameId) -> Result<Vec<PlaySession>, RepositoryError>;
    fn delete_session(&self, id: &SessionId) -> Result<bool, RepositoryError>;
    fn delete_sessions_by_game(&self, game_id: &GameId) -> Result<usize, RepositoryError>;
    fn upsert_session_by_id(&self, session: &PlaySession) -> Result<(), RepositoryError>;
    /// Delete every session of `game_id` and insert `sessions`, in one transaction.
    fn replace_sessions(
        &self,
        game_id: &GameId,
        sessions: &[PlaySession],
    ) -> Result<(), RepositoryError>;
    fn sum_session_durations(&self, game_id: &GameId) -> Result<i64, RepositoryError>;
    fn update_session_name(
        &self,
        id: &SessionId,
        name: Option<&str>,
    ) -> Result<bool, RepositoryError>;
    fn update_session_chapter(
        &self,
        id: &SessionId,
        chapter: Option<&ChapterId>,
    ) -> Result<bool, RepositoryError>;

    fn create_chapter(&self, game_id: &GameId, name: &str) -> Result<Chapter, RepositoryError>;
    fn get_chapter(&self, id: &ChapterId) -> Result<Option<Chapter>, RepositoryError>;
    /// Ordered by position.
    fn list_chapters(&self, game_id: &GameId) -> Result<Vec<Chapter>, RepositoryError>;
    /// Sessions assigned to the chapter keep existing with no chapter.
    fn delete_chapter(&self, id: &ChapterId) -> Result<bool, RepositoryError>;
}

// ---------------------------------------------------------------------------
// Session bookkeeping shared by the monitor and the CLI
// ---------------------------------------------------------------------------

/// Persist a completed session, then recompute the game's total, advance
/// `last_played` to the session end and touch `updated_at` with `now`.
pub fn record_session<R: Repository + ?Sized>(
    repo: &R,
    new: NewSession,
    now: DateTime<Utc>,
) -> Result<PlaySession, RepositoryError> {
    let game = repo
        .get_game(&new.game_id)?
        .ok_or_else(|| RepositoryError::NotFound {
            entity: "game",
            id: new.game_id.to_string(),
        })?;
    let session = repo.create_session(new)?;
    let ended = session.played_at + Duration::seconds(session.duration);
    let last_played = match game.last_played {
        Some(prev) if prev >= ended => prev,
        _ => ended,
    };
    refresh_totals(repo, &game.id, Some(last_played), now)?;
    Ok(session)
}

/// Delete one session and recompute its game's total. Returns `false` when
/// the session did not exist.
pub fn remove_session<R: Repository + ?Sized>(
    repo: &R,
    id: &SessionId,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let Some(session) = repo.get_session(id)? else {
        return Ok(false);
    };
    repo.delete_session(id)?;
    refresh_totals(repo, &session.game_id, None, now)?;
    Ok(true)
}

/// `total_play_time = SUM(sessions)`, then touch `updated_at`.
pub fn refresh_totals<R: Repository + ?Sized>(
    repo: &R,
    game_id: &GameId,
    last_played: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<i64, RepositoryError> {
    let total = repo.sum_session_durations(game_id)?;
    repo.update_total_play_time(game_id, total, last_played)?;
    repo.touch_game_updated_at(game_id, now)?;
    Ok(total)
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE games (
        id               TEXT PRIMARY KEY,
        title            TEXT NOT NULL,
        publisher        TEXT NOT NULL DEFAULT '',
        image_path       TEXT,
        exe_path         TEXT NOT NULL,
        save_folder_path TEXT,
        play_status      TEXT NOT NULL DEFAULT 'unplayed',
        total_play_time  INTEGER NOT NULL DEFAULT 0,
        last_played      TEXT,
        cleared_at       TEXT,
        current_chapter  TEXT,
        created_at       TEXT NOT NULL,
        updated_at       TEXT NOT NULL
     );
     CREATE TABLE chapters (
        id         TEXT PRIMARY KEY,
        game_id    TEXT NOT NULL REFERENCES games(id) ON DELETE CASCADE,
        name       TEXT NOT NULL,
        position   INTEGER NOT NULL,
        created_at TEXT NOT NULL
     );
     CREATE TABLE play_sessions (
        id           TEXT PRIMARY KEY,
        game_id      TEXT NOT NULL REFERENCES games(id) ON DELETE CASCADE,
        played_at    TEXT NOT NULL,
        duration     INTEGER NOT NULL CHECK (duration >= 0),
        session_name TEXT,
        chapter_id   TEXT REFERENCES chapters(id) ON DELETE SET NULL,
        upload_id    TEXT,
        updated_at   TEXT NOT NULL
     );
     CREATE INDEX idx_play_sessions_game ON play_sessions(game_id, played_at);
     CREATE INDEX idx_chapters_game ON chapters(game_id, position);",
)];

const GAME_COLUMNS: &str = "id, title, publisher, image_path, exe_path, save_folder_path, \
     play_status, total_play_time, last_played, cleared_at, current_chapter, created_at, updated_at";

const CHAPTER_COLUMNS: &str = "id, game_id, name, position, created_at";

const SESSION_COLUMNS: &str =
    "id, game_id, played_at, duration, session_name, chapter_id, upload_id, updated_at";

pub struct SqliteRepository {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open (creating if needed) the database at `path` and apply pending
    /// migrations.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let conn = Self::open(&path)?;
        let repo = Self {
            path,
            conn: Mutex::new(conn),
        };
        repo.migrate()?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest applied migration version.
    pub fn schema_version(&self) -> Result<i64, RepositoryError> {
        self.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )?)
        })
    }

    fn migrate(&self) -> Result<(), RepositoryError> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version    INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                 );",
            )?;
            let current: i64 = conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )?;
            for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
                let tx = conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, ts(Utc::now())],
                )?;
                tx.commit()?;
                tracing::debug!(version, path = %self.path.display(), "applied migration");
            }
            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        op(&mut conn)
    }

    fn open(path: &Path) -> Result<Connection, RepositoryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    fn query_games(
        conn: &Connection,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<Game>, RepositoryError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, RawGame::read)?;
        let mut games = Vec::new();
        for row in rows {
            games.push(row?.into_game()?);
        }
        Ok(games)
    }

    fn query_sessions(
        conn: &Connection,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<PlaySession>, RepositoryError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, RawSession::read)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }
        Ok(sessions)
    }

    fn insert_session(conn: &Connection, s: &PlaySession) -> Result<(), RepositoryError> {
        conn.execute(
            "INSERT INTO play_sessions (id, game_id, played_at, duration, session_name, \
                 chapter_id, upload_id, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(id) DO UPDATE SET \
                 game_id = excluded.game_id, \
                 played_at = excluded.played_at, \
                 duration = excluded.duration, \
                 session_name = excluded.session_name, \
                 chapter_id = excluded.chapter_id, \
                 upload_id = excluded.upload_id, \
                 updated_at = excluded.updated_at",
            params![
                s.id.as_str(),
                s.game_id.as_str(),
                ts(s.played_at),
                s.duration.max(0),
                s.session_name,
                s.chapter_id.as_ref().map(|c| c.as_str()),
                s.upload_id,
                ts(s.updated_at),
            ],
        )?;
        Ok(())
    }
}

impl Repository for SqliteRepository {
    fn get_game(&self, id: &GameId) -> Result<Option<Game>, RepositoryError> {
        self.with_connection(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?1"),
                    params![id.as_str()],
                    RawGame::read,
                )
                .optional()?;
            raw.map(RawGame::into_game).transpose()
        })
    }

    fn list_games(&self, filter: &GameFilter) -> Result<Vec<Game>, RepositoryError> {
        let column = match filter.sort {
            GameSort::Title => "title COLLATE NOCASE",
            GameSort::LastPlayed => "last_played",
            GameSort::TotalPlayTime => "total_play_time",
            GameSort::CreatedAt => "created_at",
            GameSort::UpdatedAt => "updated_at",
        };
        let direction = if filter.descending { "DESC" } else { "ASC" };
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s.to_lowercase()));
        let status = filter.play_status.map(|s| s.as_str());
        let sql = format!(
            "SELECT {GAME_COLUMNS} FROM games \
             WHERE (?1 IS NULL OR lower(title) LIKE ?1 OR lower(publisher) LIKE ?1) \
               AND (?2 IS NULL OR play_status = ?2) \
             ORDER BY {column} {direction}, id ASC"
        );
        self.with_connection(|conn| Self::query_games(conn, &sql, params![search, status]))
    }

    fn create_game(&self, new: NewGame) -> Result<Game, RepositoryError> {
        if new.title.trim().is_empty() {
            return Err(RepositoryError::Invalid("game title must not be empty".into()));
        }
        if new.exe_path.trim().is_empty() {
            return Err(RepositoryError::Invalid("executable path must not be empty".into()));
        }
        let now = Utc::now();
        let game = Game {
            id: GameId::generate(),
            title: new.title.trim().to_string(),
            publisher: new.publisher.trim().to_string(),
            image_path: new.image_path,
            exe_path: new.exe_path.trim().to_string(),
            save_folder_path: new.save_folder_path,
            play_status: new.play_status,
            total_play_time: 0,
            last_played: None,
            cleared_at: None,
            current_chapter: None,
            created_at: now,
            updated_at: now,
        };
        self.upsert_game_by_id(&game)?;
        Ok(game)
    }

    fn update_game(&self, game: &Game) -> Result<Game, RepositoryError> {
        let mut updated = game.clone();
        updated.updated_at = Utc::now();
        let changed = self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE games SET title = ?2, publisher = ?3, image_path = ?4, exe_path = ?5, \
                     save_folder_path = ?6, play_status = ?7, cleared_at = ?8, \
                     current_chapter = ?9, updated_at = ?10 \
                 WHERE id = ?1",
                params![
                    updated.id.as_str(),
                    updated.title,
                    updated.publisher,
                    updated.image_path,
                    updated.exe_path,
                    updated.save_folder_path,
                    updated.play_status.as_str(),
                    updated.cleared_at.map(ts),
                    updated.current_chapter,
                    ts(updated.updated_at),
                ],
            )?)
        })?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "game",
                id: game.id.to_string(),
            });
        }
        Ok(updated)
    }

    fn upsert_game_by_id(&self, game: &Game) -> Result<(), RepositoryError> {
        self.with_connection(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO games ({GAME_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
                     ON CONFLICT(id) DO UPDATE SET \
                         title = excluded.title, \
                         publisher = excluded.publisher, \
                         image_path = excluded.image_path, \
                         exe_path = excluded.exe_path, \
                         save_folder_path = excluded.save_folder_path, \
                         play_status = excluded.play_status, \
                         total_play_time = excluded.total_play_time, \
                         last_played = excluded.last_played, \
                         cleared_at = excluded.cleared_at, \
                         current_chapter = excluded.current_chapter, \
                         created_at = excluded.created_at, \
                         updated_at = excluded.updated_at"
                ),
                params![
                    game.id.as_str(),
                    game.title,
                    game.publisher,
                    game.image_path,
                    game.exe_path,
                    game.save_folder_path,
                    game.play_status.as_str(),
                    game.total_play_time,
                    game.last_played.map(ts),
                    game.cleared_at.map(ts),
                    game.current_chapter,
                    ts(game.created_at),
                    ts(game.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    fn touch_game_updated_at(
        &self,
        id: &GameId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE games SET updated_at = ?2 WHERE id = ?1",
                params![id.as_str(), ts(at)],
            )?;
            Ok(())
        })
    }

    fn update_total_play_time(
        &self,
        id: &GameId,
        total_seconds: i64,
        last_played: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE games SET total_play_time = ?2, \
                     last_played = COALESCE(?3, last_played) \
                 WHERE id = ?1",
                params![id.as_str(), total_seconds.max(0), last_played.map(ts)],
            )?;
            Ok(())
        })
    }

    fn delete_game(&self, id: &GameId) -> Result<bool, RepositoryError> {
        self.with_connection(|conn| {
            Ok(conn.execute("DELETE FROM games WHERE id = ?1", params![id.as_str()])? > 0)
        })
    }

    fn create_session(&self, new: NewSession) -> Result<PlaySession, RepositoryError> {
        if new.duration < 0 {
            return Err(RepositoryError::Invalid(format!(
                "session duration must not be negative (got {})",
                new.duration
            )));
        }
        let session = PlaySession {
            id: SessionId::generate(),
            game_id: new.game_id,
            played_at: new.played_at,
            duration: new.duration,
            session_name: new.session_name,
            chapter_id: new.chapter_id,
            upload_id: new.upload_id,
            updated_at: Utc::now(),
        };
        self.with_connection(|conn| Self::insert_session(conn, &session))?;
        Ok(session)
    }

    fn get_session(&self, id: &SessionId) -> Result<Option<PlaySession>, RepositoryError> {
        self.with_connection(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {SESSION_COLUMNS} FROM play_sessions WHERE id = ?1"),
                    params![id.as_str()],
                    RawSession::read,
                )
                .optional()?;
            raw.map(RawSession::into_session).transpose()
        })
    }

    fn list_sessions(&self, game_id: &GameId) -> Result<Vec<PlaySession>, RepositoryError> {
        self.with_connection(|conn| {
            Self::query_sessions(
                conn,
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM play_sessions WHERE game_id = ?1 \
                     ORDER BY played_at DESC, id DESC"
                ),
                params![game_id.as_str()],
            )
        })
    }

    fn delete_session(&self, id: &SessionId) -> Result<bool, RepositoryError> {
        self.with_connection(|conn| {
            Ok(conn.execute("DELETE FROM play_sessions WHERE id = ?1", params![id.as_str()])? > 0)
        })
    }

    fn delete_sessions_by_game(&self, game_id: &GameId) -> Result<usize, RepositoryError> {
        self.with_connection(|conn| {
            Ok(conn.execute(
                "DELETE FROM play_sessions WHERE game_id = ?1",
                params![game_id.as_str()],
            )?)
        })
    }

    fn upsert_session_by_id(&self, session: &PlaySession) -> Result<(), RepositoryError> {
        self.with_connection(|conn| Self::insert_session(conn, session))
    }

    fn replace_sessions(
        &self,
        game_id: &GameId,
        sessions: &[PlaySession],
    ) -> Result<(), RepositoryError> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM play_sessions WHERE game_id = ?1",
                params![game_id.as_str()],
            )?;
            for session in sessions {
                let mut owned = session.clone();
                owned.game_id = game_id.clone();
                Self::insert_session(&tx, &owned)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn sum_session_durations(&self, game_id: &GameId) -> Result<i64, RepositoryError> {
        self.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(SUM(duration), 0) FROM play_sessions WHERE game_id = ?1",
                params![game_id.as_str()],
                |row| row.get(0),
            )?)
        })
    }

    fn update_session_name(
        &self,
        id: &SessionId,
        name: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE play_sessions SET session_name = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.as_str(), name, ts(Utc::now())],
            )? > 0)
        })
    }

    fn update_session_chapter(
        &self,
        id: &SessionId,
        chapter: Option<&ChapterId>,
    ) -> Result<bool, RepositoryError> {
        self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE play_sessions SET chapter_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.as_str(), chapter.map(|c| c.as_str()), ts(Utc::now())],
            )? > 0)
        })
    }

    fn create_chapter(&self, game_id: &GameId, name: &str) -> Result<Chapter, RepositoryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RepositoryError::Invalid("chapter name must not be empty".into()));
        }
        self.with_connection(|conn| {
            let next: i64 = conn.query_row(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM chapters WHERE game_id = ?1",
                params![game_id.as_str()],
                |row| row.get(0),
            )?;
            let chapter = Chapter {
                id: ChapterId::generate(),
                game_id: game_id.clone(),
                name: name.to_string(),
                order: next,
                created_at: Utc::now(),
            };
            conn.execute(
                "INSERT INTO chapters (id, game_id, name, position, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    chapter.id.as_str(),
                    chapter.game_id.as_str(),
                    chapter.name,
                    chapter.order,
                    ts(chapter.created_at),
                ],
            )?;
            Ok(chapter)
        })
    }

    fn get_chapter(&self, id: &ChapterId) -> Result<Option<Chapter>, RepositoryError> {
        self.with_connection(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {CHAPTER_COLUMNS} FROM chapters WHERE id = ?1"),
                    params![id.as_str()],
                    RawChapter::read,
                )
                .optional()?;
            raw.map(RawChapter::into_chapter).transpose()
        })
    }

    fn list_chapters(&self, game_id: &GameId) -> Result<Vec<Chapter>, RepositoryError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE game_id = ?1 ORDER BY position ASC"
            ))?;
            let rows = stmt.query_map(params![game_id.as_str()], RawChapter::read)?;
            let mut chapters = Vec::new();
            for row in rows {
                chapters.push(row?.into_chapter()?);
            }
            Ok(chapters)
        })
    }

    fn delete_chapter(&self, id: &ChapterId) -> Result<bool, RepositoryError> {
        self.with_connection(|conn| {
            Ok(conn.execute("DELETE FROM chapters WHERE id = ?1", params![id.as_str()])? > 0)
        })
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

struct RawGame {
    id: String,
    title: String,
    publisher: String,
    image_path: Option<String>,
    exe_path: String,
    save_folder_path: Option<String>,
    play_status: String,
    total_play_time: i64,
    last_played: Option<String>,
    cleared_at: Option<String>,
    current_chapter: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawGame {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            publisher: row.get(2)?,
            image_path: row.get(3)?,
            exe_path: row.get(4)?,
            save_folder_path: row.get(5)?,
            play_status: row.get(6)?,
            total_play_time: row.get(7)?,
            last_played: row.get(8)?,
            cleared_at: row.get(9)?,
            current_chapter: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_game(self) -> Result<Game, RepositoryError> {
        let play_status: PlayStatus =
            self.play_status
                .parse()
                .map_err(|_| RepositoryError::Corrupt {
                    table: "games",
                    column: "play_status",
                    value: self.play_status.clone(),
                })?;
        Ok(Game {
            id: GameId(self.id),
            title: self.title,
            publisher: self.publisher,
            image_path: self.image_path,
            exe_path: self.exe_path,
            save_folder_path: self.save_folder_path,
            play_status,
            total_play_time: self.total_play_time,
            last_played: parse_opt_ts("games", "last_played", self.last_played)?,
            cleared_at: parse_opt_ts("games", "cleared_at", self.cleared_at)?,
            current_chapter: self.current_chapter,
            created_at: parse_ts("games", "created_at", self.created_at)?,
            updated_at: parse_ts("games", "updated_at", self.updated_at)?,
        })
    }
}

struct RawSession {
    id: String,
    game_id: String,
    played_at: String,
    duration: i64,
    session_name: Option<String>,
    chapter_id: Option<String>,
    upload_id: Option<String>,
    updated_at: String,
}

impl RawSession {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            game_id: row.get(1)?,
            played_at: row.get(2)?,
            duration: row.get(3)?,
            session_name: row.get(4)?,
            chapter_id: row.get(5)?,
            upload_id: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_session(self) -> Result<PlaySession, RepositoryError> {
        Ok(PlaySession {
            id: SessionId(self.id),
            game_id: GameId(self.game_id),
            played_at: parse_ts("play_sessions", "played_at", self.played_at)?,
            duration: self.duration,
            session_name: self.session_name,
            chapter_id: self.chapter_id.map(ChapterId),
            upload_id: self.upload_id,
            updated_at: parse_ts("play_sessions", "updated_at", self.updated_at)?,
        })
    }
}

struct RawChapter {
    id: String,
    game_id: String,
    name: String,
    position: i64,
    created_at: String,
}

impl RawChapter {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            game_id: row.get(1)?,
            name: row.get(2)?,
            position: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_chapter(self) -> Result<Chapter, RepositoryError> {
        Ok(Chapter {
            id: ChapterId(self.id),
            game_id: GameId(self.game_id),
            name: self.name,
            order: self.position,
            created_at: parse_ts("chapters", "created_at", self.created_at)?,
        })
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(
    table: &'static str,
    column: &'static str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Corrupt {
            table,
            column,
            value,
        })
}

fn parse_opt_ts(
    table: &'static str,
    column: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|v| parse_ts(table, column, v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo() -> (TempDir, SqliteRepository) {
        let dir = TempDir::new().expect("tempdir");
        let repo = SqliteRepository::new(dir.path().join("playtime.db")).expect("open");
        (dir, repo)
    }

    #[test]
    fn migrations_are_recorded_once() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nested").join("playtime.db");
        let first = SqliteRepository::new(&path).expect("open");
        assert_eq!(first.schema_version().expect("version"), 1);
        let again = SqliteRepository::new(&path).expect("reopen");
        assert_eq!(again.schema_version().expect("version"), 1);
    }

    #[test]
    fn timestamps_survive_storage_exactly() {
        let (_dir, repo) = repo();
        let game = repo
            .create_game(NewGame {
                title: "Ever17".into(),
                exe_path: r"C:\KID\ever17.exe".into(),
                ..Default::default()
            })
            .expect("create");
        let loaded = repo.get_game(&game.id).expect("get").expect("present");
        assert_eq!(loaded, game);
    }

    #[test]
    fn create_game_rejects_blank_exe() {
        let (_dir, repo) = repo();
        let err = repo
            .create_game(NewGame {
                title: "x".into(),
                exe_path: "  ".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Invalid(_)));
    }

    #[test]
    fn update_total_leaves_updated_at_alone() {
        let (_dir, repo) = repo();
        let game = repo
            .create_game(NewGame {
                title: "A".into(),
                exe_path: "a.exe".into(),
                ..Default::default()
            })
            .expect("create");
        repo.update_total_play_time(&game.id, 90, None).expect("update");
        let loaded = repo.get_game(&game.id).expect("get").expect("present");
        assert_eq!(loaded.total_play_time, 90);
        assert_eq!(loaded.updated_at, game.updated_at);
        assert_eq!(loaded.last_played, None);
    }

    #[test]
    fn deleting_a_game_cascades_to_sessions() {
        let (_dir, repo) = repo();
        let game = repo
            .create_game(NewGame {
                title: "A".into(),
                exe_path: "a.exe".into(),
                ..Default::default()
            })
            .expect("create");
        repo.create_session(NewSession {
            game_id: game.id.clone(),
            played_at: Utc::now(),
            duration: 10,
            session_name: None,
            chapter_id: None,
            upload_id: None,
        })
        .expect("session");
        assert!(repo.delete_game(&game.id).expect("delete"));
        assert_eq!(repo.sum_session_durations(&game.id).expect("sum"), 0);
        assert!(!repo.delete_game(&game.id).expect("delete again"));
    }

    #[test]
    fn calls_share_one_connection() {
        let (_dir, repo) = repo();
        repo.with_connection(|conn| Ok(conn.execute_batch("CREATE TEMP TABLE marker (x)")?))
            .expect("temp table");
        let visible: i64 = repo
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_temp_master WHERE name = 'marker'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .expect("lookup");
        assert_eq!(visible, 1);
    }

    #[test]
    fn concurrent_writers_are_serialized() {
        let (_dir, repo) = repo();
        let game = repo
            .create_game(NewGame {
                title: "A".into(),
                exe_path: "a.exe".into(),
                ..Default::default()
            })
            .expect("create");
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        record_session(
                            &repo,
                            NewSession {
                                game_id: game.id.clone(),
                                played_at: Utc::now(),
                                duration: 2,
                                session_name: None,
                                chapter_id: None,
                                upload_id: None,
                            },
                            Utc::now(),
                        )
                        .expect("record");
                    }
                });
            }
        });
        let loaded = repo.get_game(&game.id).expect("get").expect("present");
        assert_eq!(loaded.total_play_time, 200);
        assert_eq!(repo.list_sessions(&game.id).expect("list").len(), 100);
    }
}
