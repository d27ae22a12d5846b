//! Runtime file locations, all under the playtime data directory.

use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const DAEMON_LOG: &str = "daemon.log";

pub fn socket_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DAEMON_SOCKET)
}

pub fn logs_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

pub fn log_path(data_dir: &Path) -> PathBuf {
    logs_dir(data_dir).join(DAEMON_LOG)
}
