//! # playtime-sync
//!
//! Reconciles the local game library with a bucket-style object store.
//!
//! [`SyncEngine::sync_all`] and [`SyncEngine::sync_game`] compare each game's
//! `updatedAt` on both sides and move the newer copy across, together with
//! its full session list and a content-addressed cover image.
//!
//! Save folders are backed up and restored separately ([`saves`]), and
//! [`SyncEngine::list_cloud_data`] shows what the bucket holds per game.
//!
//! Buckets are either a local directory (`file://`) or an S3-compatible
//! service ([`S3ObjectStore`]).

pub mod cloud_data;
pub mod error;
pub mod image;
pub mod object_store;
pub mod reconcile;
pub mod remote;
pub mod s3;
pub mod saves;

pub use cloud_data::CloudDataItem;
pub use error::{StoreError, SyncError};
pub use object_store::{
    DefaultConnector, FsObjectStore, MemoryObjectStore, ObjectInfo, ObjectStore,
    ObjectStoreConnector, StaticConnector,
};
pub use reconcile::{decide, Decision, SyncEngine, SyncSummary};
pub use remote::{CloudGameMetadata, CloudSessionRecord, RemoteMetadata, METADATA_VERSION};
pub use s3::{S3ObjectStore, S3Options};
pub use saves::{hash_directory, SaveHash, SaveTransfer};
