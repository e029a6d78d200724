use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::services::error_handling::TimingsError;

/// Overrides `database_path` when set.
pub const DB_PATH_ENV: &str = "TIMINGS_DB";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite file holding timings and summaries
    pub database_path: PathBuf,

    /// Quiet period before a filter change reaches the store
    pub debounce_ms: u64,

    /// Quiet period before a summary edit is written
    pub summary_debounce_ms: u64,

    /// Distinct query results kept in memory
    pub cache_capacity: usize,

    /// Exit after this long without a command
    pub idle_timeout_secs: u64,

    pub idle_check_interval_secs: u64,

    pub keep_alive_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("timings.db"),
            debounce_ms: 300,
            summary_debounce_ms: 500,
            cache_capacity: 10,
            idle_timeout_secs: 15,
            idle_check_interval_secs: 5,
            keep_alive_interval_secs: 5,
        }
    }
}

impl AppConfig {
    /// Reads `path` when it exists, otherwise starts from defaults. The
    /// database override from the environment applies either way.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Self = toml::from_str(&content).map_err(|e| TimingsError::Config {
                message: format!("{}: {}", path.display(), e),
            })?;
            info!(path = %path.display(), "Loaded configuration");
            config
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        if let Some(db) = std::env::var_os(DB_PATH_ENV) {
            config.database_path = PathBuf::from(db);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// `<config dir>/timings/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| TimingsError::Config {
            message: "Could not determine config directory".to_string(),
        })?;

        Ok(config_dir.join("timings").join("config.toml"))
    }

    fn validate(&self) -> Result<(), TimingsError> {
        if self.cache_capacity == 0 {
            return Err(TimingsError::Config {
                message: "cache_capacity must be at least 1".to_string(),
            });
        }
        if self.idle_check_interval_secs == 0 || self.keep_alive_interval_secs == 0 {
            return Err(TimingsError::Config {
                message: "check intervals must be at least one second".to_string(),
            });
        }
        Ok(())
    }
}
