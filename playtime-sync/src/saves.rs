//! Save-folder backup and restore.
//!
//! A game's save folder is mirrored under `games/<id>/save_data/`, next to a
//! `games/<id>/save_hash.json` marker holding the directory hash of the last
//! upload. An upload whose hash matches the marker moves nothing.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use playtime_core::GameId;

use crate::error::{io_err, SyncError};
use crate::image::{create_private_dir, set_private_file};
use crate::object_store::ObjectStore;
use crate::remote::JSON_CONTENT_TYPE;

const SAVE_CONTENT_TYPE: &str = "application/octet-stream";

pub fn save_data_prefix(game_id: &GameId) -> String {
    format!("games/{}/save_data/", game_id.as_str())
}

pub fn save_hash_key(game_id: &GameId) -> String {
    format!("games/{}/save_hash.json", game_id.as_str())
}

/// Marker written after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveHash {
    pub hash: String,
    pub updated_at: DateTime<Utc>,
}

/// What one upload or download moved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveTransfer {
    pub files: usize,
    pub bytes: u64,
    /// Upload only: the remote copy already had this content.
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
}

/// Relative paths (`/`-separated) of every file under `root`, sorted.
fn list_files(root: &Path) -> std::io::Result<Vec<String>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if std::fs::metadata(&path)?.is_dir() {
                walk(root, &path, out)?;
                continue;
            }
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            out.push(
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
            );
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

fn file_digest(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

fn local_path(root: &Path, rel: &str) -> PathBuf {
    rel.split('/').fold(root.to_path_buf(), |p, seg| p.join(seg))
}

/// Hex sha256 over the sorted `(relative path, NUL, sha256 of file)` of
/// every file under `root`. Independent of mtimes and directory order.
pub fn hash_directory(root: &Path) -> std::io::Result<String> {
    if !std::fs::metadata(root)?.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a directory", root.display()),
        ));
    }
    let mut hasher = Sha256::new();
    for rel in list_files(root)? {
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(file_digest(&local_path(root, &rel))?);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Missing or undecodable markers read as "nothing uploaded yet".
pub fn load_save_hash(
    store: &dyn ObjectStore,
    game_id: &GameId,
) -> Result<Option<SaveHash>, SyncError> {
    let key = save_hash_key(game_id);
    match store.get_object(&key) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(hash) => Ok(Some(hash)),
            Err(e) => {
                tracing::warn!(key, error = %e, "ignoring unreadable save hash");
                Ok(None)
            }
        },
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Replace the remote copy of `folder` unless its hash is unchanged.
/// The marker is written last, so an interrupted upload is retried in full.
pub fn upload_save_folder(
    store: &dyn ObjectStore,
    game_id: &GameId,
    folder: &Path,
    now: DateTime<Utc>,
) -> Result<SaveTransfer, SyncError> {
    let hash = hash_directory(folder).map_err(|e| io_err(folder, e))?;
    if load_save_hash(store, game_id)?.is_some_and(|remote| remote.hash == hash) {
        tracing::debug!(game_id = %game_id, hash, "save data unchanged");
        return Ok(SaveTransfer {
            skipped: true,
            hash,
            ..SaveTransfer::default()
        });
    }

    let prefix = save_data_prefix(game_id);
    let removed = store.delete_objects_by_prefix(&prefix)?;
    let mut transfer = SaveTransfer {
        hash: hash.clone(),
        ..SaveTransfer::default()
    };
    for rel in list_files(folder).map_err(|e| io_err(folder, e))? {
        let path = local_path(folder, &rel);
        let body = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
        store.put_object(&format!("{prefix}{rel}"), &body, SAVE_CONTENT_TYPE)?;
        transfer.files += 1;
        transfer.bytes += body.len() as u64;
    }

    let marker = serde_json::to_vec_pretty(&SaveHash {
        hash,
        updated_at: now,
    })?;
    store.put_object(&save_hash_key(game_id), &marker, JSON_CONTENT_TYPE)?;
    tracing::info!(
        game_id = %game_id,
        files = transfer.files,
        bytes = transfer.bytes,
        removed,
        "uploaded save data"
    );
    Ok(transfer)
}

/// Relative object path under the save prefix, rejecting anything that
/// would land outside the target folder.
fn checked_relative<'a>(key: &'a str, prefix: &str) -> Result<&'a str, SyncError> {
    let rel = key.strip_prefix(prefix).unwrap_or_default();
    let bad = rel.is_empty()
        || rel.contains('\\')
        || rel.contains(':')
        || rel.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(SyncError::InvalidArgument(format!(
            "refusing to restore '{key}' outside the save folder"
        )));
    }
    Ok(rel)
}

/// Write every object under the game's save prefix into `folder`.
/// Existing files with the same name are overwritten; others are kept.
pub fn download_save_folder(
    store: &dyn ObjectStore,
    game_id: &GameId,
    folder: &Path,
) -> Result<SaveTransfer, SyncError> {
    let prefix = save_data_prefix(game_id);
    let objects = store.list_objects(&prefix)?;
    if objects.is_empty() {
        return Err(SyncError::NotFound(format!(
            "no save data in the cloud for game {game_id}"
        )));
    }
    // Validate every key before writing anything.
    let planned = objects
        .iter()
        .map(|o| checked_relative(&o.key, &prefix).map(|rel| (o.key.as_str(), rel)))
        .collect::<Result<Vec<_>, _>>()?;

    create_private_dir(folder)?;
    let mut transfer = SaveTransfer::default();
    for (key, rel) in planned {
        let body = store.get_object(key)?;
        let target = local_path(folder, rel);
        if let Some(dir) = target.parent() {
            create_private_dir(dir)?;
        }
        std::fs::write(&target, &body).map_err(|e| io_err(&target, e))?;
        set_private_file(&target)?;
        transfer.files += 1;
        transfer.bytes += body.len() as u64;
    }
    tracing::info!(
        game_id = %game_id,
        files = transfer.files,
        folder = %folder.display(),
        "restored save data"
    );
    Ok(transfer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;
    use tempfile::TempDir;

    fn folder_with(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        for (rel, body) in files {
            let path = local_path(dir.path(), rel);
            std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            std::fs::write(path, body).expect("write");
        }
        dir
    }

    #[test]
    fn directory_hash_matches_reference_construction() {
        let dir = folder_with(&[("b.sav", "two"), ("a/slot1.dat", "one")]);

        let mut expected = Sha256::new();
        for (rel, body) in [("a/slot1.dat", "one"), ("b.sav", "two")] {
            expected.update(rel.as_bytes());
            expected.update([0u8]);
            expected.update(Sha256::digest(body.as_bytes()));
        }
        assert_eq!(
            hash_directory(dir.path()).expect("hash"),
            hex::encode(expected.finalize())
        );
    }

    #[test]
    fn directory_hash_tracks_names_and_contents() {
        let base = hash_directory(folder_with(&[("a.sav", "x")]).path()).expect("base");
        let same = hash_directory(folder_with(&[("a.sav", "x")]).path()).expect("same");
        let renamed = hash_directory(folder_with(&[("b.sav", "x")]).path()).expect("renamed");
        let edited = hash_directory(folder_with(&[("a.sav", "y")]).path()).expect("edited");
        assert_eq!(base, same);
        assert_ne!(base, renamed);
        assert_ne!(base, edited);
    }

    #[test]
    fn hashing_a_file_is_rejected() {
        let dir = folder_with(&[("a.sav", "x")]);
        let err = hash_directory(&dir.path().join("a.sav")).expect_err("not a dir");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn unchanged_folder_is_not_uploaded_twice() {
        let store = MemoryObjectStore::new();
        let id = GameId::from("g1");
        let dir = folder_with(&[("slot1.sav", "hp=10"), ("cfg/options.ini", "vol=3")]);

        let first = upload_save_folder(&store, &id, dir.path(), Utc::now()).expect("upload");
        assert_eq!(first.files, 2);
        assert!(!first.skipped);
        assert_eq!(
            store.keys(),
            vec![
                "games/g1/save_data/cfg/options.ini",
                "games/g1/save_data/slot1.sav",
                "games/g1/save_hash.json",
            ]
        );

        let second = upload_save_folder(&store, &id, dir.path(), Utc::now()).expect("again");
        assert!(second.skipped);
        assert_eq!(second.hash, first.hash);
    }

    #[test]
    fn changed_folder_replaces_the_remote_copy() {
        let store = MemoryObjectStore::new();
        let id = GameId::from("g1");
        let dir = folder_with(&[("old.sav", "1")]);
        upload_save_folder(&store, &id, dir.path(), Utc::now()).expect("upload");

        std::fs::remove_file(dir.path().join("old.sav")).expect("rm");
        std::fs::write(dir.path().join("new.sav"), "2").expect("write");
        let transfer = upload_save_folder(&store, &id, dir.path(), Utc::now()).expect("upload");
        assert_eq!(transfer.files, 1);
        assert!(!store.keys().contains(&"games/g1/save_data/old.sav".to_string()));
        let marker: SaveHash = serde_json::from_slice(
            &store.get_object("games/g1/save_hash.json").expect("marker"),
        )
        .expect("decode");
        assert_eq!(marker.hash, transfer.hash);
    }

    #[test]
    fn download_restores_the_folder() {
        let store = MemoryObjectStore::new();
        let id = GameId::from("g1");
        let source = folder_with(&[("slot1.sav", "hp=10"), ("cfg/options.ini", "vol=3")]);
        upload_save_folder(&store, &id, source.path(), Utc::now()).expect("upload");

        let target = TempDir::new().expect("tempdir");
        let restored = target.path().join("Saves");
        let transfer = download_save_folder(&store, &id, &restored).expect("download");
        assert_eq!(transfer.files, 2);
        assert_eq!(
            std::fs::read_to_string(restored.join("cfg").join("options.ini")).expect("read"),
            "vol=3"
        );
        assert_eq!(
            hash_directory(&restored).expect("hash"),
            hash_directory(source.path()).expect("hash")
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(restored.join("slot1.sav"))
                .expect("meta")
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn download_without_remote_data_is_not_found() {
        let store = MemoryObjectStore::new();
        let target = TempDir::new().expect("tempdir");
        let err = download_save_folder(&store, &GameId::from("g1"), target.path())
            .expect_err("nothing remote");
        assert_eq!(err.detail(), "not-found");
    }

    #[test]
    fn escaping_keys_are_refused_before_writing() {
        let prefix = "games/g1/save_data/";
        assert_eq!(
            checked_relative("games/g1/save_data/a/b.sav", prefix).expect("ok"),
            "a/b.sav"
        );
        for key in [
            "games/g1/save_data/",
            "games/g1/save_data/a//b",
            "games/g1/save_data/C:evil",
            "games/g1/save_data/a\\..\\b",
        ] {
            assert!(checked_relative(key, prefix).is_err(), "{key}");
        }
    }
}
