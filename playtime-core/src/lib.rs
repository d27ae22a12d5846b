//! Playtime core library: domain types, configuration, the local SQLite
//! repository and credential storage.
//!
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`RepositoryError`], [`ConfigError`], [`CredentialError`]
//! - [`config`]: `config.yaml` + `PLAYTIME_*` overrides
//! - [`repository`]: [`Repository`] trait and [`SqliteRepository`]
//! - [`credentials`]: [`CredentialStore`] and the JSON file store

pub mod config;
pub mod credentials;
pub mod error;
pub mod repository;
pub mod types;

pub use config::Config;
pub use credentials::{Credential, CredentialStore, FileCredentialStore};
pub use error::{ConfigError, CredentialError, RepositoryError};
pub use repository::{Repository, SqliteRepository};
pub use types::{
    Chapter, ChapterId, Game, GameFilter, GameId, GameSort, NewGame, NewSession, PlaySession,
    PlayStatus, SessionId, UNCONFIGURED_EXE_PATH,
};
