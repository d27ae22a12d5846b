//! Size-based rotation of `daemon.log`.
//!
//! `daemon.log` becomes `daemon.log.1`, older copies shift up by one and
//! anything past `.5` is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log` when it has reached `max_bytes`. A missing log is not an
/// error. Returns whether a rotation happened.
pub fn rotate_if_needed(log: &Path, max_bytes: u64, keep: usize) -> io::Result<bool> {
    match fs::metadata(log) {
        Ok(meta) if meta.len() >= max_bytes => {}
        Ok(_) => return Ok(false),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    }

    if keep == 0 {
        fs::remove_file(log)?;
        return Ok(true);
    }
    remove_if_present(&rotated(log, keep))?;
    for n in (1..keep).rev() {
        let from = rotated(log, n);
        if from.exists() {
            fs::rename(&from, rotated(log, n + 1))?;
        }
    }
    fs::rename(log, rotated(log, 1))?;
    Ok(true)
}

/// Rotate the daemon log under `data_dir`, logging the outcome.
pub fn rotate_daemon_log(data_dir: &Path) {
    let log = crate::paths::log_path(data_dir);
    match rotate_if_needed(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(path = %log.display(), "daemon log rotated"),
        Ok(false) => {}
        Err(err) => tracing::warn!(path = %log.display(), error = %err, "log rotation failed"),
    }
}

/// `daemon.log` -> `daemon.log.<n>`
fn rotated(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
