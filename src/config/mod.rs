//! Configuration management for shipload

pub mod schema;

pub use schema::Config;

use crate::error::{ShiploadError, ShiploadResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shipload")
            .join("config.toml")
    }

    /// Get the default module cache directory
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shipload")
    }

    /// Get the event log path
    pub fn event_log_path() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shipload")
            .join("events.log")
    }

    /// Cache directory from config, falling back to the platform default
    pub fn cache_dir(config: &Config) -> PathBuf {
        config
            .cache
            .directory
            .clone()
            .unwrap_or_else(Self::default_cache_dir)
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> ShiploadResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> ShiploadResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ShiploadError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| ShiploadError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if config.loader.concurrent_downloads == 0 {
            return Err(ShiploadError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: "loader.concurrent_downloads must be at least 1".to_string(),
            });
        }
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> ShiploadResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            ShiploadError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> ShiploadResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ShiploadError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
