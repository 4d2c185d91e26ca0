//! Load events
//!
//! The loader reports what it did through an `EventListener` rather than
//! through errors, so fallbacks stay observable. `JsonLinesListener` appends
//! each event to `~/.local/state/shipload/events.log`.

use crate::config::{schema::Config, ConfigManager};
use crate::error::ErrorKind;
use crate::fetch::FetchSource;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Something observable that happened during a load or download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    ManifestFetched {
        url: String,
        source: FetchSource,
    },
    ModuleFetched {
        id: String,
        sha256: String,
        source: FetchSource,
    },
    LoadSucceeded {
        application: String,
        modules: usize,
    },
    LoadFailed {
        application: String,
        kind: ErrorKind,
        message: String,
    },
    /// A failed load was replaced by the previous context, or by a local load
    /// when there was none
    FallbackUsed {
        application: String,
        local: bool,
    },
    DownloadComplete {
        manifest_url: String,
        modules: usize,
    },
    CachePruned {
        removed: usize,
    },
}

impl LoadEvent {
    /// Stable dotted event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::ManifestFetched { .. } => "manifest.fetched",
            Self::ModuleFetched { .. } => "module.fetched",
            Self::LoadSucceeded { .. } => "load.succeeded",
            Self::LoadFailed { .. } => "load.failed",
            Self::FallbackUsed { .. } => "load.fallback",
            Self::DownloadComplete { .. } => "download.complete",
            Self::CachePruned { .. } => "cache.pruned",
        }
    }

    /// Event payload as JSON
    pub fn data(&self) -> serde_json::Value {
        match self {
            Self::ManifestFetched { url, source } => json!({
                "url": url,
                "source": source.as_str(),
            }),
            Self::ModuleFetched { id, sha256, source } => json!({
                "id": id,
                "sha256": sha256,
                "source": source.as_str(),
            }),
            Self::LoadSucceeded {
                application,
                modules,
            } => json!({
                "application": application,
                "modules": modules,
            }),
            Self::LoadFailed {
                application,
                kind,
                message,
            } => json!({
                "application": application,
                "kind": kind.as_str(),
                "message": message,
            }),
            Self::FallbackUsed { application, local } => json!({
                "application": application,
                "local": local,
            }),
            Self::DownloadComplete {
                manifest_url,
                modules,
            } => json!({
                "manifest_url": manifest_url,
                "modules": modules,
            }),
            Self::CachePruned { removed } => json!({ "removed": removed }),
        }
    }
}

/// Receives load events. Implementations must not fail the load.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &LoadEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

#[async_trait]
impl EventListener for NoopListener {
    async fn on_event(&self, _event: &LoadEvent) {}
}

/// File-based event log that appends JSON lines
pub struct JsonLinesListener {
    enabled: bool,
    path: PathBuf,
}

impl JsonLinesListener {
    /// Create an event log from config
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.event_log,
            path: ConfigManager::event_log_path(),
        }
    }

    /// Always-enabled event log at an explicit path
    pub fn at(path: PathBuf) -> Self {
        Self {
            enabled: true,
            path,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EventListener for JsonLinesListener {
    /// IO failures are logged and dropped.
    async fn on_event(&self, event: &LoadEvent) {
        if !self.enabled {
            return;
        }

        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event.name(),
            "data": event.data(),
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize load event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write event log: {}", e);
        }
    }
}
