//! Error types for playtime-sync.

use std::path::PathBuf;

use thiserror::Error;

use playtime_core::{CredentialError, RepositoryError};

/// Errors from an [`ObjectStore`](crate::object_store::ObjectStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key does not exist. Callers treat this as "empty", not a failure.
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    /// The credential's endpoint cannot be served by any backend.
    #[error("unsupported endpoint '{0}'")]
    UnsupportedEndpoint(String),

    #[error("access key id and secret are required for {0}")]
    MissingKeys(String),

    /// The server answered with a non-success status.
    #[error("{method} {key}: HTTP {status}: {message}")]
    Http {
        method: &'static str,
        key: String,
        status: u16,
        message: String,
    },

    /// No usable response (DNS, connect, TLS, timeout).
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("malformed response for {key}: {message}")]
    Malformed { key: String, message: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Worth another attempt: transport failures, throttling and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport { .. } => true,
            StoreError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// All errors that can abort a reconciliation run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("offline mode is enabled")]
    Offline,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested game or cloud data does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("cannot open object store: {0}")]
    Connect(#[source] StoreError),

    #[error("object store error: {0}")]
    Store(#[from] StoreError),

    /// A remote document could not be decoded.
    #[error("corrupt remote object {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Short, user-facing summary.
    pub fn message(&self) -> &'static str {
        match self {
            SyncError::Offline => "sync is disabled while offline",
            SyncError::InvalidArgument(_) => "invalid sync request",
            SyncError::NotFound(_) => "nothing to sync",
            SyncError::Credential(_) | SyncError::Connect(_) => "failed to load cloud credentials",
            SyncError::Store(_) => "failed to reach cloud storage",
            SyncError::Corrupt { .. } | SyncError::Json(_) => "cloud data is corrupt",
            SyncError::Repository(_) | SyncError::Io { .. } => "failed to update local data",
        }
    }

    /// Machine-readable category.
    pub fn detail(&self) -> &'static str {
        match self {
            SyncError::Offline => "offline",
            SyncError::InvalidArgument(_) => "invalid-argument",
            SyncError::NotFound(_) => "not-found",
            SyncError::Credential(_) | SyncError::Connect(_) => "credential",
            SyncError::Store(_) => "network",
            SyncError::Corrupt { .. } | SyncError::Json(_) => "corrupt",
            SyncError::Repository(_) | SyncError::Io { .. } => "local-store",
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn store_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_are_stable_categories() {
        assert_eq!(SyncError::Offline.detail(), "offline");
        assert_eq!(
            SyncError::Store(StoreError::InvalidKey("x".into())).detail(),
            "network"
        );
        assert_eq!(
            SyncError::Connect(StoreError::UnsupportedEndpoint("s3://x".into())).detail(),
            "credential"
        );
        assert_eq!(
            SyncError::Credential(CredentialError::NotFound("default".into())).message(),
            "failed to load cloud credentials"
        );
        assert_eq!(
            SyncError::Connect(StoreError::MissingKeys("https://s3".into())).detail(),
            "credential"
        );
    }

    #[test]
    fn only_network_failures_are_transient() {
        let http = |status| StoreError::Http {
            method: "GET",
            key: "k".into(),
            status,
            message: String::new(),
        };
        assert!(http(503).is_transient());
        assert!(http(429).is_transient());
        assert!(!http(403).is_transient());
        assert!(StoreError::Transport {
            url: "http://x".into(),
            message: "refused".into()
        }
        .is_transient());
        assert!(!StoreError::NotFound { key: "k".into() }.is_transient());
    }
}
