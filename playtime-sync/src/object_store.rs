//! Object store abstraction and the backends the engine can reach.
//!
//! Keys are `/`-separated and relative to the bucket root. Writes are whole
//! objects; there is no partial update.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use playtime_core::Credential;

use crate::error::{store_io_err, StoreError};
use crate::s3::{S3ObjectStore, S3Options};

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

pub trait ObjectStore: Send + Sync {
    fn put_object(&self, key: &str, body: &[u8], content_type: &str) -> Result<(), StoreError>;
    /// [`StoreError::NotFound`] when the key does not exist.
    fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError>;
    /// Returns the number of objects removed.
    fn delete_objects_by_prefix(&self, prefix: &str) -> Result<usize, StoreError>;
}

/// Turns a credential into a connected store.
pub trait ObjectStoreConnector: Send + Sync {
    fn connect(&self, credential: &Credential) -> Result<Arc<dyn ObjectStore>, StoreError>;
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        Err(StoreError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// A directory acting as a bucket. Used for `file://` endpoints.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }

    fn walk(&self, dir: &Path, out: &mut Vec<ObjectInfo>) -> Result<(), StoreError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(store_io_err(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| store_io_err(dir, e))?;
            let path = entry.path();
            let meta = entry.metadata().map_err(|e| store_io_err(&path, e))?;
            if meta.is_dir() {
                self.walk(&path, out)?;
                continue;
            }
            if path.extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(ObjectInfo {
                key,
                size: meta.len(),
                last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        Ok(())
    }
}

impl ObjectStore for FsObjectStore {
    fn put_object(&self, key: &str, body: &[u8], _content_type: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| store_io_err(dir, e))?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, body).map_err(|e| store_io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| store_io_err(&path, e))
    }

    fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(store_io_err(path, e)),
        }
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let mut all = Vec::new();
        self.walk(&self.root, &mut all)?;
        all.retain(|o| o.key.starts_with(prefix));
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }

    fn delete_objects_by_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let doomed = self.list_objects(prefix)?;
        for object in &doomed {
            let path = self.path_for(&object.key)?;
            std::fs::remove_file(&path).map_err(|e| store_io_err(path, e))?;
        }
        Ok(doomed.len())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryObject {
    body: Vec<u8>,
    content_type: String,
    modified: DateTime<Utc>,
}

/// Process-local store, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, MemoryObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, MemoryObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock().get(key).map(|o| o.content_type.clone())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put_object(&self, key: &str, body: &[u8], content_type: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.lock().insert(
            key.to_string(),
            MemoryObject {
                body: body.to_vec(),
                content_type: content_type.to_string(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.lock()
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| ObjectInfo {
                key: k.clone(),
                size: o.body.len() as u64,
                last_modified: Some(o.modified),
            })
            .collect())
    }

    fn delete_objects_by_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut objects = self.lock();
        let before = objects.len();
        objects.retain(|k, _| !k.starts_with(prefix));
        Ok(before - objects.len())
    }
}

// ---------------------------------------------------------------------------
// Connectors
// ---------------------------------------------------------------------------

/// Picks a backend from the credential's endpoint: `file://<dir>` is an
/// [`FsObjectStore`] rooted at `<dir>/<bucket>`, `http(s)://` URLs and bare
/// hosts are S3-compatible services. Other schemes are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector {
    s3: S3Options,
}

impl DefaultConnector {
    pub fn new(s3: S3Options) -> Self {
        Self { s3 }
    }
}

impl ObjectStoreConnector for DefaultConnector {
    fn connect(&self, credential: &Credential) -> Result<Arc<dyn ObjectStore>, StoreError> {
        let endpoint = credential.endpoint.trim();
        let Some(path) = endpoint.strip_prefix("file://") else {
            return Ok(Arc::new(S3ObjectStore::connect(credential, self.s3)?));
        };
        if path.is_empty() {
            return Err(StoreError::UnsupportedEndpoint(endpoint.to_string()));
        }
        let root = Path::new(path).join(credential.bucket_name.trim());
        std::fs::create_dir_all(&root).map_err(|e| store_io_err(&root, e))?;
        tracing::debug!(root = %root.display(), "connected filesystem object store");
        Ok(Arc::new(FsObjectStore::new(root)))
    }
}

/// Always hands out the same store, whatever the credential says.
#[derive(Clone)]
pub struct StaticConnector {
    store: Arc<dyn ObjectStore>,
}

impl StaticConnector {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

impl ObjectStoreConnector for StaticConnector {
    fn connect(&self, _credential: &Credential) -> Result<Arc<dyn ObjectStore>, StoreError> {
        Ok(Arc::clone(&self.store))
    }
}
