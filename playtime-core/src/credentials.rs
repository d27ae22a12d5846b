//! Object-store credentials, stored as a JSON map in
//! `<data_dir>/credentials.json` with mode `0600`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{credential_io_err, CredentialError};

pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Connection details for one bucket.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    pub bucket_name: String,
    #[serde(default)]
    pub region: String,
    /// `file:///path` selects the filesystem bucket.
    pub endpoint: String,
}

impl Credential {
    /// Bucket and endpoint are required; keys may be empty for
    /// filesystem-backed buckets.
    pub fn validate(&self, key: &str) -> Result<(), CredentialError> {
        if self.bucket_name.trim().is_empty() {
            return Err(CredentialError::Incomplete {
                key: key.to_string(),
                field: "bucketName",
            });
        }
        if self.endpoint.trim().is_empty() {
            return Err(CredentialError::Incomplete {
                key: key.to_string(),
                field: "endpoint",
            });
        }
        Ok(())
    }
}

// Keep the secret out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Lookup of credentials by key.
pub trait CredentialStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Credential, CredentialError>;
    fn save(&self, key: &str, credential: &Credential) -> Result<(), CredentialError>;
}

/// JSON file implementation.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/credentials.json`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(CREDENTIALS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, Credential>, CredentialError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| credential_io_err(&self.path, e))?;
        serde_json::from_str(&contents).map_err(|source| CredentialError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, key: &str) -> Result<Credential, CredentialError> {
        let credential = self
            .read_all()?
            .remove(key)
            .ok_or_else(|| CredentialError::NotFound(key.to_string()))?;
        credential.validate(key)?;
        Ok(credential)
    }

    fn save(&self, key: &str, credential: &Credential) -> Result<(), CredentialError> {
        credential.validate(key)?;
        let mut all = self.read_all()?;
        all.insert(key.to_string(), credential.clone());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| credential_io_err(parent, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&all)?;
        std::fs::write(&tmp, json).map_err(|e| credential_io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| credential_io_err(&self.path, e))?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CredentialError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| credential_io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CredentialError> {
    Ok(())
}
