//! Error types for playtime-monitor.

use std::time::Duration;

use thiserror::Error;

use playtime_core::{GameId, RepositoryError};

/// Failures of a single process-enumeration strategy.
#[derive(Debug, Error)]
pub enum EnumerateError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` did not finish within {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("could not parse process list: {0}")]
    Parse(String),

    /// The enumeration task panicked or was cancelled.
    #[error("enumeration task aborted: {0}")]
    Aborted(String),
}

/// Errors surfaced by explicit monitor operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("game not found: {0}")]
    UnknownGame(GameId),

    #[error("game {0} has no executable configured")]
    Unconfigured(GameId),

    #[error("background task failed: {0}")]
    Join(String),
}
