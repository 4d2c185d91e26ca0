//! Offline bundling
//!
//! `Downloader` persists one application version into a directory laid out
//! exactly like an embedded snapshot: every module under its hex digest and
//! the manifest as `manifest.json`. The manifest is written last, so its
//! presence means the directory is complete.

use crate::cache::ContentCache;
use crate::error::{ShiploadError, ShiploadResult};
use crate::events::{EventListener, LoadEvent, NoopListener};
use crate::loader::module::write_atomically;
use crate::loader::{ModuleLoader, DEFAULT_CONCURRENT_DOWNLOADS};
use crate::manifest::{Manifest, PREBUILT_MANIFEST_FILE_NAME};
use crate::transport::Transport;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Downloads manifests and their modules into a directory
pub struct Downloader {
    directory: PathBuf,
    transport: Arc<dyn Transport>,
    cache: Option<Arc<ContentCache>>,
    gate: Arc<Semaphore>,
    listener: Arc<dyn EventListener>,
}

impl Downloader {
    pub fn new(directory: impl Into<PathBuf>, transport: Arc<dyn Transport>) -> Self {
        Self {
            directory: directory.into(),
            transport,
            cache: None,
            gate: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_DOWNLOADS)),
            listener: Arc::new(NoopListener),
        }
    }

    /// Reuse and fill `cache` while downloading
    pub fn with_cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_concurrency(mut self, concurrent_downloads: usize) -> Self {
        self.gate = Arc::new(Semaphore::new(concurrent_downloads.max(1)));
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Download the manifest at `manifest_url` and every module it lists
    pub async fn download(&self, manifest_url: &str) -> ShiploadResult<Manifest> {
        let manifest_bytes = self.transport.fetch(manifest_url).await.map_err(|e| {
            warn!(url = %manifest_url, error = %e, "manifest download failed");
            ShiploadError::ManifestUnavailable {
                url: manifest_url.to_string(),
            }
        })?;
        let manifest = Manifest::parse(&manifest_bytes)?.resolve_urls(manifest_url);

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| {
                ShiploadError::io(format!("creating {}", self.directory.display()), e)
            })?;

        ModuleLoader::download_only(
            &self.directory,
            self.transport.clone(),
            self.cache.clone(),
            self.gate.clone(),
        )
        .with_listener(self.listener.clone())
        .load(&manifest)
        .await?;

        write_atomically(
            &self.directory.join(PREBUILT_MANIFEST_FILE_NAME),
            &manifest_bytes,
        )
        .await?;

        info!(
            url = %manifest_url,
            modules = manifest.len(),
            directory = %self.directory.display(),
            "download complete"
        );
        self.listener
            .on_event(&LoadEvent::DownloadComplete {
                manifest_url: manifest_url.to_string(),
                modules: manifest.len(),
            })
            .await;
        Ok(manifest)
    }
}
