//! The remote metadata document and per-game session objects.
//!
//! Layout under the bucket root:
//!
//! - `<metadata key>` (default `games.json`): `{version, updatedAt, games: [...]}`
//! - `games/<id>/sessions.json`: the full session list of one game
//! - `games/<id>/thumbnail/<sha256><ext>`: content-addressed cover image

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use playtime_core::{Game, GameId, PlayStatus, PlaySession, SessionId};

use crate::error::SyncError;
use crate::object_store::ObjectStore;

pub const METADATA_VERSION: u32 = 2;
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// One game as stored in the metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudGameMetadata {
    pub id: GameId,
    pub title: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
    #[serde(default)]
    pub play_status: PlayStatus,
    #[serde(default)]
    pub total_play_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_played: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleared_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_chapter: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CloudGameMetadata {
    /// Everything but the image key, which depends on the upload.
    pub fn from_game(game: &Game) -> Self {
        Self {
            id: game.id.clone(),
            title: game.title.clone(),
            publisher: game.publisher.clone(),
            image_key: None,
            play_status: game.play_status,
            total_play_time: game.total_play_time,
            last_played: game.last_played,
            cleared_at: game.cleared_at,
            current_chapter: game.current_chapter.clone(),
            created_at: game.created_at,
            updated_at: game.updated_at,
        }
    }

    pub fn image_key(&self) -> Option<&str> {
        self.image_key.as_deref().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSessionRecord {
    pub id: SessionId,
    pub played_at: DateTime<Utc>,
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CloudSessionRecord {
    pub fn from_session(session: &PlaySession) -> Self {
        Self {
            id: session.id.clone(),
            played_at: session.played_at,
            duration: session.duration,
            session_name: session.session_name.clone(),
            updated_at: session.updated_at,
        }
    }

    /// Chapter links and upload ids are local-only and come back empty.
    pub fn into_session(self, game_id: &GameId) -> PlaySession {
        PlaySession {
            id: self.id,
            game_id: game_id.clone(),
            played_at: self.played_at,
            duration: self.duration,
            session_name: self.session_name,
            chapter_id: None,
            upload_id: None,
            updated_at: self.updated_at,
        }
    }
}

/// Decoded metadata document.
///
/// Entries of `games` that do not decode are kept verbatim in `invalid` and
/// written back after the valid ones, so a newer client's data survives.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMetadata {
    pub version: u32,
    pub updated_at: Option<DateTime<Utc>>,
    pub games: Vec<CloudGameMetadata>,
    pub invalid: Vec<serde_json::Value>,
}

impl Default for RemoteMetadata {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION,
            updated_at: None,
            games: Vec::new(),
            invalid: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    games: Vec<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutDocument {
    version: u32,
    updated_at: DateTime<Utc>,
    games: Vec<serde_json::Value>,
}

impl RemoteMetadata {
    pub fn parse(bytes: &[u8], key: &str) -> Result<Self, SyncError> {
        let raw: RawDocument = serde_json::from_slice(bytes).map_err(|source| SyncError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        let mut doc = RemoteMetadata {
            version: raw.version.unwrap_or(METADATA_VERSION),
            updated_at: raw.updated_at,
            ..RemoteMetadata::default()
        };
        for value in raw.games {
            match serde_json::from_value::<CloudGameMetadata>(value.clone()) {
                Ok(game) if !game.id.as_str().is_empty() => doc.games.push(game),
                Ok(_) => {
                    tracing::warn!(key, "remote game entry without id; preserving as-is");
                    doc.invalid.push(value);
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "unparsable remote game entry; preserving as-is");
                    doc.invalid.push(value);
                }
            }
        }
        Ok(doc)
    }

    /// Serialize with games ordered by title, then id.
    pub fn to_bytes(&self, updated_at: DateTime<Utc>) -> Result<Vec<u8>, SyncError> {
        let mut sorted: Vec<&CloudGameMetadata> = self.games.iter().collect();
        sorted.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        let mut games = sorted
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        games.extend(self.invalid.iter().cloned());
        let doc = OutDocument {
            version: METADATA_VERSION,
            updated_at,
            games,
        };
        Ok(serde_json::to_vec_pretty(&doc)?)
    }
}

pub fn sessions_key(game_id: &GameId) -> String {
    format!("games/{}/sessions.json", game_id.as_str())
}

pub fn thumbnail_key(game_id: &GameId, hash: &str, ext: &str) -> String {
    format!("games/{}/thumbnail/{hash}{ext}", game_id.as_str())
}

/// Missing document reads as an empty version-2 document.
pub fn load_metadata(store: &dyn ObjectStore, key: &str) -> Result<RemoteMetadata, SyncError> {
    match store.get_object(key) {
        Ok(bytes) => RemoteMetadata::parse(&bytes, key),
        Err(e) if e.is_not_found() => Ok(RemoteMetadata::default()),
        Err(e) => Err(e.into()),
    }
}

pub fn save_metadata(
    store: &dyn ObjectStore,
    key: &str,
    doc: &RemoteMetadata,
    updated_at: DateTime<Utc>,
) -> Result<(), SyncError> {
    let body = doc.to_bytes(updated_at)?;
    store.put_object(key, &body, JSON_CONTENT_TYPE)?;
    Ok(())
}

/// Missing object reads as no sessions; an undecodable one is
/// [`SyncError::Corrupt`].
pub fn load_sessions(
    store: &dyn ObjectStore,
    game_id: &GameId,
) -> Result<Vec<CloudSessionRecord>, SyncError> {
    let key = sessions_key(game_id);
    match store.get_object(&key) {
        Ok(bytes) => {
            serde_json::from_slice(&bytes).map_err(|source| SyncError::Corrupt { key, source })
        }
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

pub fn save_sessions(
    store: &dyn ObjectStore,
    game_id: &GameId,
    sessions: &[CloudSessionRecord],
) -> Result<(), SyncError> {
    let body = serde_json::to_vec_pretty(sessions)?;
    store.put_object(&sessions_key(game_id), &body, JSON_CONTENT_TYPE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap()
    }

    fn record(id: &str, title: &str) -> CloudGameMetadata {
        CloudGameMetadata {
            id: GameId::from(id),
            title: title.into(),
            publisher: String::new(),
            image_key: None,
            play_status: PlayStatus::Playing,
            total_play_time: 60,
            last_played: None,
            cleared_at: None,
            current_chapter: None,
            created_at: at(1),
            updated_at: at(2),
        }
    }

    #[test]
    fn missing_document_is_empty_v2() {
        let store = MemoryObjectStore::new();
        let doc = load_metadata(&store, "games.json").unwrap();
        assert_eq!(doc.version, METADATA_VERSION);
        assert!(doc.games.is_empty());
    }

    #[test]
    fn invalid_entries_survive_a_rewrite() {
        let store = MemoryObjectStore::new();
        let raw = serde_json::json!({
            "version": 2,
            "updatedAt": "2024-03-01T00:00:00Z",
            "games": [
                {"id": "b", "title": "Beta", "playStatus": "played", "totalPlayTime": 5,
                 "createdAt": "2024-03-01T00:00:00Z", "updatedAt": "2024-03-01T00:00:00Z"},
                {"id": "x", "title": 42}
            ]
        });
        store
            .put_object("games.json", raw.to_string().as_bytes(), JSON_CONTENT_TYPE)
            .unwrap();

        let mut doc = load_metadata(&store, "games.json").unwrap();
        assert_eq!(doc.games.len(), 1);
        assert_eq!(doc.invalid.len(), 1);

        doc.games.push(record("a", "Alpha"));
        save_metadata(&store, "games.json", &doc, at(5)).unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&store.get_object("games.json").unwrap()).unwrap();
        let games = written["games"].as_array().unwrap();
        assert_eq!(games.len(), 3);
        assert_eq!(games[0]["title"], "Alpha");
        assert_eq!(games[1]["title"], "Beta");
        assert_eq!(games[2], serde_json::json!({"id": "x", "title": 42}));
        assert_eq!(written["version"], 2);
    }

    #[test]
    fn garbage_document_is_corrupt() {
        let store = MemoryObjectStore::new();
        store.put_object("games.json", b"not json", JSON_CONTENT_TYPE).unwrap();
        let err = load_metadata(&store, "games.json").unwrap_err();
        assert_eq!(err.detail(), "corrupt");
    }

    #[test]
    fn sessions_round_trip_and_missing_is_empty() {
        let store = MemoryObjectStore::new();
        let id = GameId::from("g");
        assert!(load_sessions(&store, &id).unwrap().is_empty());

        let records = vec![CloudSessionRecord {
            id: SessionId::from("s1"),
            played_at: at(3),
            duration: 120,
            session_name: Some("evening".into()),
            updated_at: at(4),
        }];
        save_sessions(&store, &id, &records).unwrap();
        assert_eq!(load_sessions(&store, &id).unwrap(), records);
        assert_eq!(
            store.content_type("games/g/sessions.json").as_deref(),
            Some(JSON_CONTENT_TYPE)
        );
    }
}
