//! osbridge configuration
//!
//! Loaded from `$OSB_CONFIG` or `<config_dir>/osbridge/config.toml`.
//! Every key has a default, so a missing file is equivalent to an empty one.

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "OSB_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Watch engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Window in which a repeated native event for the same entry is dropped
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,

    /// Quiet period before the diagnostic tree is re-rendered
    #[serde(default = "default_stats_debounce_ms")]
    pub stats_debounce_ms: u64,

    /// Maximum number of symlink hops followed while resolving a link
    #[serde(default = "default_max_link_depth")]
    pub max_link_depth: u32,
}

impl WatchConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn stats_debounce(&self) -> Duration {
        Duration::from_millis(self.stats_debounce_ms)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.dedup_window_ms > 1000 {
            return Err(CoreError::InvalidConfig {
                key: "watch.dedup_window_ms",
                reason: format!("{} is above the 1000ms limit", self.dedup_window_ms),
            });
        }
        if !(10..=60_000).contains(&self.stats_debounce_ms) {
            return Err(CoreError::InvalidConfig {
                key: "watch.stats_debounce_ms",
                reason: format!("{} is outside 10-60000", self.stats_debounce_ms),
            });
        }
        if !(1..=256).contains(&self.max_link_depth) {
            return Err(CoreError::InvalidConfig {
                key: "watch.max_link_depth",
                reason: format!("{} is outside 1-256", self.max_link_depth),
            });
        }
        Ok(())
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: default_dedup_window_ms(),
            stats_debounce_ms: default_stats_debounce_ms(),
            max_link_depth: default_max_link_depth(),
        }
    }
}

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding the socket, lock file and logs
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Default tracing filter (overridden by `RUST_LOG`)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Subscriptions opened at startup; their events are logged
    #[serde(default)]
    pub watch: Vec<StartupWatch>,
}

impl DaemonConfig {
    /// Resolve the state directory
    ///
    /// Falls back to the runtime dir, then the cache dir, then the temp dir.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("osbridge")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state_dir().join("daemon.sock")
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            log_level: default_log_level(),
            watch: vec![],
        }
    }
}

/// A subscription the daemon opens on startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupWatch {
    pub path: PathBuf,

    #[serde(default)]
    pub recursive: bool,

    #[serde(default)]
    pub depth: Option<u32>,
}

impl Config {
    /// Load from the default location
    pub fn load() -> Result<Self> {
        match config_file_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load and validate a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text).map_err(|source| CoreError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.watch.validate()?;
        Ok(config)
    }

    fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Location of the config file
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("osbridge").join("config.toml"))
}

fn default_dedup_window_ms() -> u64 {
    16
}

fn default_stats_debounce_ms() -> u64 {
    100
}

fn default_max_link_depth() -> u32 {
    32
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.watch.dedup_window(), Duration::from_millis(16));
        assert_eq!(config.watch.max_link_depth, 32);
        assert_eq!(config.daemon.log_level, "info");
        assert!(config.daemon.watch.is_empty());
        assert!(config.watch.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.watch.dedup_window_ms, 16);
        assert_eq!(config.watch.stats_debounce_ms, 100);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[watch]
dedup_window_ms = 30

[daemon]
state_dir = "/run/osb"
log_level = "debug"

[[daemon.watch]]
path = "/etc"

[[daemon.watch]]
path = "/srv/data"
recursive = true
depth = 2
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.watch.dedup_window_ms, 30);
        assert_eq!(config.watch.max_link_depth, 32);
        assert_eq!(config.daemon.state_dir(), PathBuf::from("/run/osb"));
        assert_eq!(config.daemon.socket_path(), PathBuf::from("/run/osb/daemon.sock"));
        assert_eq!(
            config.daemon.watch,
            vec![
                StartupWatch { path: "/etc".into(), recursive: false, depth: None },
                StartupWatch { path: "/srv/data".into(), recursive: true, depth: Some(2) },
            ]
        );
    }

    #[test]
    fn test_out_of_range_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[watch]\nmax_link_depth = 0\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidConfig { key: "watch.max_link_depth", .. }
        ));
    }

    #[test]
    fn test_parse_error_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[watch\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }
}
