//! Normalization and process-to-game matching.
//!
//! A game is considered running when some process has the same normalized
//! executable name and its command line confirms the configured path: equal,
//! containing it, contained in it, or containing the path's directory.

use std::collections::HashMap;

use unicode_normalization::UnicodeNormalization;

use playtime_core::types::{exe_dir, exe_file_name};

use crate::enumerate::ProcessInfo;

/// Lower-case, then Unicode NFC. Empty stays empty.
pub fn normalize_token(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    value.to_lowercase().nfc().collect()
}

/// Processes grouped by normalized name.
#[derive(Debug, Default)]
pub struct ProcessIndex {
    by_name: HashMap<String, Vec<ProcessInfo>>,
}

impl ProcessIndex {
    pub fn build(processes: &[ProcessInfo]) -> Self {
        let mut by_name: HashMap<String, Vec<ProcessInfo>> = HashMap::new();
        for proc in processes.iter().filter(|p| !p.name.is_empty()) {
            by_name
                .entry(normalize_token(&proc.name))
                .or_default()
                .push(proc.clone());
        }
        Self { by_name }
    }

    pub fn candidates(&self, exe_name: &str) -> &[ProcessInfo] {
        self.by_name
            .get(&normalize_token(exe_name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_name(&self, exe_name: &str) -> bool {
        !self.candidates(exe_name).is_empty()
    }

    /// Whether the game configured with `exe_path` is running.
    pub fn is_running(&self, exe_path: &str) -> bool {
        is_game_process_running(exe_path, self.candidates(exe_file_name(exe_path)))
    }
}

/// Confirm a game against processes that share its executable name.
pub fn is_game_process_running(exe_path: &str, processes: &[ProcessInfo]) -> bool {
    let exe_name = normalize_token(exe_file_name(exe_path));
    let path = normalize_token(exe_path.trim());
    let dir = normalize_token(exe_dir(exe_path));
    if exe_name.is_empty() || path.is_empty() {
        return false;
    }

    processes.iter().any(|proc| {
        if proc.name.is_empty() || proc.cmd.is_empty() {
            return false;
        }
        if normalize_token(&proc.name) != exe_name {
            return false;
        }
        let cmd = normalize_token(&proc.cmd);
        cmd == path
            || cmd.contains(&path)
            || path.contains(&cmd)
            || (!dir.is_empty() && cmd.contains(&dir))
    })
}
