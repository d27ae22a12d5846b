//! Process monitoring for playtime.
//!
//! [`ProcessMonitor`] polls the process list, matches processes to the
//! executables configured in the local repository and turns what it sees
//! into play sessions.
//!
//! - [`enumerate`]: `sysinfo` and platform-command strategies, output decoding
//! - [`matcher`]: normalization and command-line confirmation
//! - [`state`]: per-game session state machine
//! - [`monitor`]: the registry, polling loop and explicit overrides

pub mod enumerate;
pub mod error;
pub mod matcher;
pub mod monitor;
pub mod state;

pub use enumerate::{
    CommandEnumerator, Enumeration, EnumerationSource, FallbackEnumerator, ProcessEnumerator,
    ProcessInfo, ProcessSnapshot, ProcessSnapshotItem, SysinfoEnumerator,
};
pub use error::{EnumerateError, MonitorError};
pub use matcher::normalize_token;
pub use monitor::{MonitorSettings, ProcessMonitor, SyncTrigger};
pub use state::{GameStatus, MonitoredGame, SessionState};
