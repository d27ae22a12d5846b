//! `config.yaml` loading with `PLAYTIME_*` environment overrides.
//!
//! # Layout
//!
//! ```text
//! ~/.playtime/            (or $PLAYTIME_HOME)
//!   config.yaml           optional; every field has a default
//!   playtime.db           default database location
//!   credentials.json      see [`crate::credentials`]
//!   images/<game_id>/     downloaded thumbnails
//!   logs/daemon.log
//! ```
//!
//! Functions taking an explicit directory (`*_at`, `load_from`) are what the
//! tests use; the no-arg forms resolve the directory from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{config_io_err, ConfigError};

pub const CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_DB_FILE: &str = "playtime.db";
pub const DEFAULT_METADATA_KEY: &str = "games.json";
pub const DEFAULT_CREDENTIAL_KEY: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Overrides `<data_dir>/playtime.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` still wins.
    pub log_level: String,
    pub monitor: MonitorConfig,
    pub cloud: CloudConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            log_level: "info".to_string(),
            monitor: MonitorConfig::default(),
            cloud: CloudConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    /// How long a running game may go unseen before its interval is banked.
    pub absence_grace_secs: u64,
    /// How long an idle or pending-end game may go unseen before it is dropped.
    pub cleanup_timeout_secs: u64,
    pub enumeration_timeout_secs: u64,
    pub auto_detect: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            absence_grace_secs: 4,
            cleanup_timeout_secs: 20,
            enumeration_timeout_secs: 5,
            auto_detect: true,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn absence_grace(&self) -> Duration {
        Duration::from_secs(self.absence_grace_secs)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }

    pub fn enumeration_timeout(&self) -> Duration {
        Duration::from_secs(self.enumeration_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub metadata_key: String,
    pub credential_key: String,
    pub offline: bool,
    /// Run a per-game sync after the monitor records a session.
    pub sync_after_session: bool,
    /// S3 path-style addressing (`host/bucket/key`), needed by most
    /// self-hosted services.
    pub force_path_style: bool,
    /// Scheme for S3 endpoints written without one.
    pub use_tls: bool,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
            credential_key: DEFAULT_CREDENTIAL_KEY.to_string(),
            offline: false,
            sync_after_session: true,
            force_path_style: false,
            use_tls: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Directories
// ---------------------------------------------------------------------------

/// `<home>/.playtime`. Pure, no I/O.
pub fn data_dir_at(home: &Path) -> PathBuf {
    home.join(".playtime")
}

/// `$PLAYTIME_HOME` if set, otherwise `~/.playtime`.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = std::env::var_os("PLAYTIME_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(data_dir_at(&home))
}

/// Directory holding downloaded thumbnails for one game.
pub fn images_dir_at(data_dir: &Path, game_id: &str) -> PathBuf {
    data_dir.join("images").join(game_id)
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

impl Config {
    /// Read `<data_dir>/config.yaml`; a missing file yields the defaults.
    /// Environment overrides are not applied.
    pub fn load_from(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| config_io_err(&path, e))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Resolve the data dir, read the file, then apply `PLAYTIME_*` overrides.
    pub fn load() -> Result<(PathBuf, Self), ConfigError> {
        let dir = data_dir()?;
        let mut config = Self::load_from(&dir)?;
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok((dir, config))
    }

    /// Atomically write `<data_dir>/config.yaml` (`.tmp` + rename).
    pub fn save_to(&self, data_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(data_dir).map_err(|e| config_io_err(data_dir, e))?;
        let path = data_dir.join(CONFIG_FILE);
        let tmp = data_dir.join(format!("{CONFIG_FILE}.tmp"));
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(&tmp, yaml).map_err(|e| config_io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| config_io_err(&path, e))?;
        Ok(())
    }

    /// Apply overrides from `lookup` (normally `std::env::var`). Unset or empty
    /// variables are ignored; malformed numbers and booleans are errors.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PLAYTIME_DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PLAYTIME_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = get("PLAYTIME_MONITOR_INTERVAL_SECS") {
            self.monitor.interval_secs = v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "PLAYTIME_MONITOR_INTERVAL_SECS",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("PLAYTIME_AUTO_DETECT") {
            self.monitor.auto_detect = parse_bool("PLAYTIME_AUTO_DETECT", &v)?;
        }
        if let Some(v) = get("PLAYTIME_CLOUD_METADATA_KEY") {
            self.cloud.metadata_key = v;
        }
        if let Some(v) = get("PLAYTIME_CREDENTIAL_KEY") {
            self.cloud.credential_key = v;
        }
        if let Some(v) = get("PLAYTIME_OFFLINE") {
            self.cloud.offline = parse_bool("PLAYTIME_OFFLINE", &v)?;
        }
        if let Some(v) = get("PLAYTIME_S3_FORCE_PATH_STYLE") {
            self.cloud.force_path_style = parse_bool("PLAYTIME_S3_FORCE_PATH_STYLE", &v)?;
        }
        if let Some(v) = get("PLAYTIME_S3_USE_TLS") {
            self.cloud.use_tls = parse_bool("PLAYTIME_S3_USE_TLS", &v)?;
        }
        Ok(())
    }

    /// Effective database path.
    pub fn db_path(&self, data_dir: &Path) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| data_dir.join(DEFAULT_DB_FILE))
    }

    /// Effective metadata key; blank values fall back to `games.json`.
    pub fn metadata_key(&self) -> &str {
        let key = self.cloud.metadata_key.trim();
        if key.is_empty() {
            DEFAULT_METADATA_KEY
        } else {
            key
        }
    }

    pub fn credential_key(&self) -> &str {
        let key = self.cloud.credential_key.trim();
        if key.is_empty() {
            DEFAULT_CREDENTIAL_KEY
        } else {
            key
        }
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let config = Config::load_from(dir.path()).expect("load");
        assert_eq!(config, Config::default());
        assert_eq!(config.monitor.interval(), Duration::from_secs(2));
        assert_eq!(config.metadata_key(), "games.json");
        assert_eq!(config.db_path(dir.path()), dir.path().join("playtime.db"));
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "monitor:\n  interval_secs: 5\ncloud:\n  offline: true\n",
        )
        .expect("write");
        let config = Config::load_from(dir.path()).expect("load");
        assert_eq!(config.monitor.interval_secs, 5);
        assert_eq!(config.monitor.cleanup_timeout_secs, 20);
        assert!(config.cloud.offline);
        assert_eq!(config.cloud.credential_key, "default");
        assert!(config.cloud.use_tls);
        assert!(!config.cloud.force_path_style);
    }

    #[test]
    fn malformed_yaml_reports_path() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), "monitor: [unclosed").expect("write");
        let err = Config::load_from(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("PLAYTIME_MONITOR_INTERVAL_SECS", "7"),
                ("PLAYTIME_AUTO_DETECT", "off"),
                ("PLAYTIME_CREDENTIAL_KEY", "nas"),
                ("PLAYTIME_OFFLINE", "1"),
                ("PLAYTIME_S3_FORCE_PATH_STYLE", "true"),
                ("PLAYTIME_LOG_LEVEL", ""),
            ]))
            .expect("apply");
        assert_eq!(config.monitor.interval_secs, 7);
        assert!(!config.monitor.auto_detect);
        assert_eq!(config.credential_key(), "nas");
        assert!(config.cloud.offline);
        assert!(config.cloud.force_path_style);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn malformed_env_value_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("PLAYTIME_OFFLINE", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "PLAYTIME_OFFLINE", .. }));
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = Config::default();
        config.cloud.metadata_key = "library.json".into();
        config.save_to(dir.path()).expect("save");
        assert!(!dir.path().join("config.yaml.tmp").exists());
        assert_eq!(Config::load_from(dir.path()).expect("load"), config);
    }

    #[test]
    fn blank_keys_fall_back_to_defaults() {
        let mut config = Config::default();
        config.cloud.metadata_key = "  ".into();
        config.cloud.credential_key = String::new();
        assert_eq!(config.metadata_key(), DEFAULT_METADATA_KEY);
        assert_eq!(config.credential_key(), DEFAULT_CREDENTIAL_KEY);
    }
}
