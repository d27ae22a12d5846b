//! Two-way reconciliation between the local repository and the bucket.
//!
//! Per game, the side with the newer `updatedAt` wins. The metadata document
//! is rewritten at most once per run, and only when something was uploaded.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use playtime_core::types::UNCONFIGURED_EXE_PATH;
use playtime_core::{CredentialStore, Game, GameFilter, GameId, Repository};

use crate::cloud_data::{delete_prefix, group_objects, CloudDataItem};
use crate::error::SyncError;
use crate::image::{download_image_if_needed, load_image, upload_image_if_needed};
use crate::object_store::{ObjectStore, ObjectStoreConnector};
use crate::remote::{
    load_metadata, load_sessions, save_metadata, save_sessions, CloudGameMetadata,
    CloudSessionRecord,
};
use crate::saves::{download_save_folder, upload_save_folder, SaveTransfer};

/// Counts reported by one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub uploaded_games: usize,
    pub downloaded_games: usize,
    pub uploaded_sessions: usize,
    pub downloaded_sessions: usize,
    pub uploaded_images: usize,
    pub downloaded_images: usize,
    pub skipped_games: usize,
    /// Remote entries that could not be decoded and were left alone.
    pub invalid_records: usize,
}

/// Which way one game moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Upload,
    Download,
    Skip,
}

/// `None` only when neither side has the game.
pub fn decide(local: Option<DateTime<Utc>>, remote: Option<DateTime<Utc>>) -> Option<Decision> {
    match (local, remote) {
        (None, None) => None,
        (Some(_), None) => Some(Decision::Upload),
        (None, Some(_)) => Some(Decision::Download),
        (Some(l), Some(r)) if l > r => Some(Decision::Upload),
        (Some(l), Some(r)) if l < r => Some(Decision::Download),
        _ => Some(Decision::Skip),
    }
}

/// Reconciliation engine. Runs are blocking and serialized.
pub struct SyncEngine {
    repo: Arc<dyn Repository>,
    credentials: Arc<dyn CredentialStore>,
    connector: Arc<dyn ObjectStoreConnector>,
    data_dir: PathBuf,
    metadata_key: String,
    offline: AtomicBool,
    run_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        repo: Arc<dyn Repository>,
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn ObjectStoreConnector>,
        data_dir: impl Into<PathBuf>,
        metadata_key: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            credentials,
            connector,
            data_dir: data_dir.into(),
            metadata_key: metadata_key.into(),
            offline: AtomicBool::new(false),
            run_lock: Mutex::new(()),
        }
    }

    pub fn set_offline_mode(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        tracing::info!(offline, "sync offline mode changed");
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    pub fn sync_all(&self, credential_key: &str) -> Result<SyncSummary, SyncError> {
        self.run(credential_key, None)
    }

    pub fn sync_game(
        &self,
        credential_key: &str,
        game_id: &GameId,
    ) -> Result<SyncSummary, SyncError> {
        if game_id.as_str().trim().is_empty() {
            return Err(SyncError::InvalidArgument("game id is empty".into()));
        }
        self.run(credential_key, Some(game_id))
    }

    /// Back up the game's save folder. Skipped when the folder hash matches
    /// the last upload.
    pub fn upload_save_data(
        &self,
        credential_key: &str,
        game_id: &GameId,
    ) -> Result<SaveTransfer, SyncError> {
        let store = self.connect(credential_key)?;
        let folder = self.save_folder(game_id, None)?;
        let _guard = self.run_lock.lock().unwrap_or_else(PoisonError::into_inner);
        upload_save_folder(store.as_ref(), game_id, &folder, Utc::now())
    }

    /// Restore the game's save data into `target`, or into its configured
    /// save folder.
    pub fn download_save_data(
        &self,
        credential_key: &str,
        game_id: &GameId,
        target: Option<&Path>,
    ) -> Result<SaveTransfer, SyncError> {
        let store = self.connect(credential_key)?;
        let folder = self.save_folder(game_id, target)?;
        let _guard = self.run_lock.lock().unwrap_or_else(PoisonError::into_inner);
        download_save_folder(store.as_ref(), game_id, &folder)
    }

    pub fn list_cloud_data(&self, credential_key: &str) -> Result<Vec<CloudDataItem>, SyncError> {
        let store = self.connect(credential_key)?;
        Ok(group_objects(&store.list_objects("")?))
    }

    /// Delete everything under `path` (`""` or `"*"` for the whole bucket).
    /// Deleting `games/<id>` also drops the game from the metadata document
    /// so other machines do not expect its sessions.
    pub fn delete_cloud_data(&self, credential_key: &str, path: &str) -> Result<usize, SyncError> {
        let prefix = delete_prefix(path);
        let store = self.connect(credential_key)?;
        let store = store.as_ref();
        let _guard = self.run_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let removed = store.delete_objects_by_prefix(&prefix)?;
        let game_id = prefix
            .strip_prefix("games/")
            .and_then(|rest| rest.strip_suffix('/'))
            .filter(|id| !id.contains('/'));
        if let Some(id) = game_id {
            let mut metadata = load_metadata(store, &self.metadata_key)?;
            let before = metadata.games.len();
            metadata.games.retain(|g| g.id.as_str() != id);
            if metadata.games.len() != before {
                save_metadata(store, &self.metadata_key, &metadata, Utc::now())?;
            }
        }
        tracing::info!(prefix, removed, "deleted cloud data");
        Ok(removed)
    }

    fn save_folder(&self, game_id: &GameId, target: Option<&Path>) -> Result<PathBuf, SyncError> {
        if let Some(target) = target {
            return Ok(target.to_path_buf());
        }
        let game = self
            .repo
            .get_game(game_id)?
            .ok_or_else(|| SyncError::NotFound(format!("game {game_id}")))?;
        game.save_folder_path
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                SyncError::InvalidArgument(format!("'{}' has no save folder configured", game.title))
            })
    }

    /// Offline check, credential lookup and connection shared by every
    /// remote operation.
    fn connect(&self, credential_key: &str) -> Result<Arc<dyn ObjectStore>, SyncError> {
        if self.is_offline() {
            return Err(SyncError::Offline);
        }
        let credential_key = credential_key.trim();
        if credential_key.is_empty() {
            return Err(SyncError::InvalidArgument("credential key is empty".into()));
        }
        let credential = self.credentials.load(credential_key)?;
        self.connector
            .connect(&credential)
            .map_err(SyncError::Connect)
    }

    fn run(&self, credential_key: &str, scope: Option<&GameId>) -> Result<SyncSummary, SyncError> {
        let store = self.connect(credential_key)?;
        let store = store.as_ref();
        let _guard = self.run_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut metadata = load_metadata(store, &self.metadata_key)?;
        let mut summary = SyncSummary {
            invalid_records: metadata.invalid.len(),
            ..SyncSummary::default()
        };

        let local: HashMap<GameId, Game> = match scope {
            Some(id) => self.repo.get_game(id)?.into_iter().map(|g| (g.id.clone(), g)).collect(),
            None => self
                .repo
                .list_games(&GameFilter::default())?
                .into_iter()
                .map(|g| (g.id.clone(), g))
                .collect(),
        };
        let mut merged: BTreeMap<GameId, CloudGameMetadata> = metadata
            .games
            .drain(..)
            .map(|g| (g.id.clone(), g))
            .collect();

        let ids: BTreeSet<GameId> = local
            .keys()
            .chain(merged.keys())
            .filter(|id| scope.map_or(true, |s| s == *id))
            .cloned()
            .collect();

        let mut dirty = false;
        for id in &ids {
            let local_game = local.get(id);
            let remote_game = merged.get(id);
            let decision = decide(
                local_game.map(|g| g.updated_at),
                remote_game.map(|g| g.updated_at),
            );
            match (decision, local_game, remote_game) {
                (Some(Decision::Upload), Some(game), existing) => {
                    let record = self.upload_game(store, game, existing, &mut summary)?;
                    merged.insert(id.clone(), record);
                    dirty = true;
                }
                (Some(Decision::Download), local_game, Some(cloud)) => {
                    match self.download_game(store, cloud, local_game, &mut summary) {
                        Err(SyncError::Corrupt { key, source }) => {
                            tracing::warn!(game_id = %id, key = %key, error = %source, "skipping game with corrupt remote sessions");
                            summary.invalid_records += 1;
                        }
                        other => other?,
                    }
                }
                _ => summary.skipped_games += 1,
            }
        }

        if dirty {
            metadata.games = merged.into_values().collect();
            save_metadata(store, &self.metadata_key, &metadata, Utc::now())?;
        }
        tracing::info!(
            scope = scope.map(GameId::as_str),
            uploaded = summary.uploaded_games,
            downloaded = summary.downloaded_games,
            skipped = summary.skipped_games,
            invalid = summary.invalid_records,
            "sync finished"
        );
        Ok(summary)
    }

    fn upload_game(
        &self,
        store: &dyn ObjectStore,
        game: &Game,
        existing: Option<&CloudGameMetadata>,
        summary: &mut SyncSummary,
    ) -> Result<CloudGameMetadata, SyncError> {
        let sessions = self.repo.list_sessions(&game.id)?;
        let records: Vec<CloudSessionRecord> =
            sessions.iter().map(CloudSessionRecord::from_session).collect();
        save_sessions(store, &game.id, &records)?;

        let mut record = CloudGameMetadata::from_game(game);
        let existing_key = existing.and_then(CloudGameMetadata::image_key);
        let image_path = game.image_path.as_deref().filter(|p| !p.trim().is_empty());
        if let Some(path) = image_path {
            match load_image(path) {
                Ok(image) => {
                    let upload = upload_image_if_needed(store, &game.id, &image, existing_key)?;
                    if upload.uploaded {
                        summary.uploaded_images += 1;
                    }
                    record.image_key = Some(upload.key);
                }
                Err(e) => {
                    tracing::warn!(game_id = %game.id, path, error = %e, "cannot read image; keeping remote image");
                }
            }
        }
        if record.image_key.is_none() {
            record.image_key = existing_key.map(str::to_string);
        }

        summary.uploaded_games += 1;
        summary.uploaded_sessions += records.len();
        tracing::debug!(game_id = %game.id, sessions = records.len(), "uploaded game");
        Ok(record)
    }

    fn download_game(
        &self,
        store: &dyn ObjectStore,
        cloud: &CloudGameMetadata,
        local: Option<&Game>,
        summary: &mut SyncSummary,
    ) -> Result<(), SyncError> {
        // Fetch everything remote before touching local state.
        let sessions: Vec<_> = load_sessions(store, &cloud.id)?
            .into_iter()
            .map(|r| r.into_session(&cloud.id))
            .collect();

        let mut image_path = local.and_then(|g| g.image_path.clone());
        if let Some(key) = cloud.image_key() {
            let (path, downloaded) =
                download_image_if_needed(store, &self.data_dir, &cloud.id, key)?;
            if downloaded {
                summary.downloaded_images += 1;
            }
            image_path = Some(path.to_string_lossy().into_owned());
        }

        let exe_path = local
            .map(|g| g.exe_path.clone())
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| UNCONFIGURED_EXE_PATH.to_string());
        let game = Game {
            id: cloud.id.clone(),
            title: cloud.title.clone(),
            publisher: cloud.publisher.clone(),
            image_path,
            exe_path,
            save_folder_path: local.and_then(|g| g.save_folder_path.clone()),
            play_status: cloud.play_status,
            total_play_time: cloud.total_play_time,
            last_played: cloud.last_played,
            cleared_at: cloud.cleared_at,
            current_chapter: cloud.current_chapter.clone(),
            created_at: cloud.created_at,
            updated_at: cloud.updated_at,
        };
        self.repo.upsert_game_by_id(&game)?;
        self.repo.replace_sessions(&game.id, &sessions)?;
        let total = self.repo.sum_session_durations(&game.id)?;
        self.repo.update_total_play_time(&game.id, total, None)?;

        summary.downloaded_games += 1;
        summary.downloaded_sessions += sessions.len();
        tracing::debug!(game_id = %game.id, sessions = sessions.len(), total, "downloaded game");
        Ok(())
    }
}
