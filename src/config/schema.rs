//! Configuration schema for shipload
//!
//! Configuration is stored at `~/.config/shipload/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Module cache settings
    pub cache: CacheConfig,

    /// Module loader settings
    pub loader: LoaderConfig,

    /// Network transport settings
    pub network: NetworkConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append load events as JSON lines to the event log
    pub event_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            event_log: false,
        }
    }
}

/// Module cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory (defaults to the platform cache dir)
    pub directory: Option<PathBuf>,

    /// Byte budget enforced by pruning
    pub max_size_bytes: u64,

    /// Prune to the budget after every successful load
    pub prune_after_load: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_size_bytes: 100 * 1024 * 1024,
            prune_after_load: true,
        }
    }
}

/// Module loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum simultaneous module fetches per load
    pub concurrent_downloads: usize,

    /// Read-only directory of modules shipped with the application
    pub embedded_dir: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            concurrent_downloads: 3,
            embedded_dir: None,
        }
    }
}

/// Network transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Retries for transient failures (5xx, 429, connection errors)
    pub retries: u32,

    /// Linear backoff step between retries, in milliseconds
    pub retry_backoff_ms: u64,

    /// Largest response body accepted, in bytes
    pub max_body_bytes: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retries: 2,
            retry_backoff_ms: 500,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}
