//! Loader orchestration
//!
//! `Loader` resolves a manifest, drives its modules into an execution
//! context, and implements load-or-fallback: a failed update never replaces
//! a context that is already running.
//!
//! # Manifest sources
//!
//! | Entry point | Sources, in order |
//! |-------------|-------------------|
//! | `load` with a URL | embedded, network, pinned |
//! | `load_or_fall_back` | network |
//! | local fallback | embedded, pinned |

pub mod module;

pub use module::{
    ContextReceiver, DirectoryReceiver, ModuleLoader, Receiver, DEFAULT_CONCURRENT_DOWNLOADS,
};

use crate::cache::ContentCache;
use crate::config::schema::Config;
use crate::error::{ShiploadError, ShiploadResult};
use crate::events::{EventListener, LoadEvent, NoopListener};
use crate::fetch::{CacheFetcher, EmbeddedFetcher, Fetcher, NetworkFetcher};
use crate::manifest::Manifest;
use crate::runtime::{ExecutionContext, Runtime};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Loader construction options
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Simultaneous module fetches shared by this loader's loads
    pub concurrent_downloads: usize,
    /// Snapshot shipped with the application
    pub embedded_dir: Option<PathBuf>,
    /// Prune the cache to its budget after each successful load
    pub prune_after_load: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            concurrent_downloads: DEFAULT_CONCURRENT_DOWNLOADS,
            embedded_dir: None,
            prune_after_load: true,
        }
    }
}

impl From<&Config> for LoaderOptions {
    fn from(config: &Config) -> Self {
        Self {
            concurrent_downloads: config.loader.concurrent_downloads.max(1),
            embedded_dir: config.loader.embedded_dir.clone(),
            prune_after_load: config.cache.prune_after_load,
        }
    }
}

/// Where `Loader::load` gets its manifest
#[derive(Debug, Clone)]
pub enum ManifestSource {
    Manifest(Manifest),
    Url(String),
}

impl From<Manifest> for ManifestSource {
    fn from(manifest: Manifest) -> Self {
        Self::Manifest(manifest)
    }
}

impl From<&str> for ManifestSource {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
enum ManifestChain {
    Prebuilt,
    Fresh,
    Local,
}

/// Loads applications into execution contexts
pub struct Loader {
    runtime: Arc<dyn Runtime>,
    transport: Arc<dyn Transport>,
    cache: Arc<ContentCache>,
    embedded: Option<Arc<EmbeddedFetcher>>,
    options: LoaderOptions,
    gate: Arc<Semaphore>,
    listener: Arc<dyn EventListener>,
    /// Last context that loaded successfully, per application
    active: Mutex<HashMap<String, Arc<dyn ExecutionContext>>>,
}

impl Loader {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        transport: Arc<dyn Transport>,
        cache: Arc<ContentCache>,
        options: LoaderOptions,
    ) -> Self {
        let embedded = options
            .embedded_dir
            .as_ref()
            .map(|dir| Arc::new(EmbeddedFetcher::new(dir)));
        let gate = Arc::new(Semaphore::new(options.concurrent_downloads.max(1)));
        Self {
            runtime,
            transport,
            cache,
            embedded,
            options,
            gate,
            listener: Arc::new(NoopListener),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// The context currently running `application`, if any
    pub fn active(&self, application: &str) -> Option<Arc<dyn ExecutionContext>> {
        self.active.lock().get(application).cloned()
    }

    /// Load a manifest into `context`.
    ///
    /// Errors propagate; nothing falls back.
    pub async fn load(
        &self,
        context: &Arc<dyn ExecutionContext>,
        source: impl Into<ManifestSource>,
    ) -> ShiploadResult<Manifest> {
        let (manifest, manifest_url) = match source.into() {
            ManifestSource::Manifest(manifest) => (manifest, None),
            ManifestSource::Url(url) => {
                let manifest = self
                    .resolve_manifest(context.name(), &url, ManifestChain::Prebuilt)
                    .await?;
                (manifest, Some(url))
            }
        };

        self.load_modules(context, &manifest, true).await?;
        self.after_load(context.name(), manifest_url.as_deref(), &manifest)
            .await;
        Ok(manifest)
    }

    /// Load the latest version of `application` into a new context, keeping
    /// the previous one on any failure
    pub async fn load_or_fall_back(
        &self,
        application: &str,
        manifest_url: &str,
    ) -> ShiploadResult<Option<Arc<dyn ExecutionContext>>> {
        self.load_or_fall_back_with(application, manifest_url, |_| async { Ok(()) })
            .await
    }

    /// Like `load_or_fall_back`, with a hook that may reject a load that
    /// otherwise succeeded.
    ///
    /// Returns the context now running `application`: the new one, the
    /// previous one, or one loaded from local sources. `None` means nothing
    /// could be loaded at all. Fetch, verify and receive failures are
    /// reported as events, never as errors.
    pub async fn load_or_fall_back_with<F, Fut>(
        &self,
        application: &str,
        manifest_url: &str,
        on_loaded: F,
    ) -> ShiploadResult<Option<Arc<dyn ExecutionContext>>>
    where
        F: FnOnce(Arc<dyn ExecutionContext>) -> Fut,
        Fut: Future<Output = ShiploadResult<()>>,
    {
        if application.is_empty() {
            return Err(ShiploadError::User(
                "application name must not be empty".to_string(),
            ));
        }

        match self.load_fresh(application, manifest_url, on_loaded).await {
            Ok(context) => {
                self.active
                    .lock()
                    .insert(application.to_string(), context.clone());
                return Ok(Some(context));
            }
            Err(e) => self.report_failure(application, &e).await,
        }

        if let Some(previous) = self.active(application) {
            warn!(application, "keeping previously loaded version");
            self.emit(LoadEvent::FallbackUsed {
                application: application.to_string(),
                local: false,
            })
            .await;
            return Ok(Some(previous));
        }

        match self.load_local(application, manifest_url).await {
            Ok(context) => {
                warn!(application, "loaded local version");
                self.active
                    .lock()
                    .insert(application.to_string(), context.clone());
                self.emit(LoadEvent::FallbackUsed {
                    application: application.to_string(),
                    local: true,
                })
                .await;
                Ok(Some(context))
            }
            Err(e) => {
                self.report_failure(application, &e).await;
                Ok(None)
            }
        }
    }

    async fn load_fresh<F, Fut>(
        &self,
        application: &str,
        manifest_url: &str,
        on_loaded: F,
    ) -> ShiploadResult<Arc<dyn ExecutionContext>>
    where
        F: FnOnce(Arc<dyn ExecutionContext>) -> Fut,
        Fut: Future<Output = ShiploadResult<()>>,
    {
        let manifest = self
            .resolve_manifest(application, manifest_url, ManifestChain::Fresh)
            .await?;
        let context = self.create_context(application).await?;

        let result = async {
            self.load_modules(&context, &manifest, true).await?;
            on_loaded(context.clone()).await
        }
        .await;
        if let Err(e) = result {
            context.close().await;
            return Err(e);
        }

        self.after_load(application, Some(manifest_url), &manifest)
            .await;
        Ok(context)
    }

    /// Load from the embedded snapshot or the pinned manifest, offline
    async fn load_local(
        &self,
        application: &str,
        manifest_url: &str,
    ) -> ShiploadResult<Arc<dyn ExecutionContext>> {
        let manifest = self
            .resolve_manifest(application, manifest_url, ManifestChain::Local)
            .await?;
        let context = self.create_context(application).await?;
        if let Err(e) = self.load_modules(&context, &manifest, false).await {
            context.close().await;
            return Err(e);
        }
        Ok(context)
    }

    async fn create_context(&self, application: &str) -> ShiploadResult<Arc<dyn ExecutionContext>> {
        self.runtime
            .create(application)
            .await
            .map_err(|e| ShiploadError::receiver(application, e))
    }

    async fn load_modules(
        &self,
        context: &Arc<dyn ExecutionContext>,
        manifest: &Manifest,
        network: bool,
    ) -> ShiploadResult<()> {
        ModuleLoader::production(
            self.module_fetchers(network),
            context.clone(),
            self.gate.clone(),
        )
        .with_listener(self.listener.clone())
        .load(manifest)
        .await
    }

    fn module_fetchers(&self, network: bool) -> Vec<Arc<dyn Fetcher>> {
        let mut fetchers: Vec<Arc<dyn Fetcher>> = Vec::new();
        if let Some(embedded) = &self.embedded {
            fetchers.push(embedded.clone());
        }
        fetchers.push(Arc::new(CacheFetcher::new(self.cache.clone())));
        if network {
            fetchers.push(Arc::new(
                NetworkFetcher::new(self.transport.clone()).with_cache(self.cache.clone()),
            ));
        }
        fetchers
    }

    fn manifest_fetchers(&self, chain: ManifestChain) -> Vec<Arc<dyn Fetcher>> {
        let embedded = self
            .embedded
            .clone()
            .map(|fetcher| fetcher as Arc<dyn Fetcher>);
        let cache: Arc<dyn Fetcher> = Arc::new(CacheFetcher::new(self.cache.clone()));
        let network: Arc<dyn Fetcher> = Arc::new(NetworkFetcher::new(self.transport.clone()));

        match chain {
            ManifestChain::Prebuilt => embedded.into_iter().chain([network, cache]).collect(),
            ManifestChain::Fresh => vec![network],
            ManifestChain::Local => embedded.into_iter().chain([cache]).collect(),
        }
    }

    /// First manifest that some source has and that parses
    async fn resolve_manifest(
        &self,
        application: &str,
        manifest_url: &str,
        chain: ManifestChain,
    ) -> ShiploadResult<Manifest> {
        for fetcher in self.manifest_fetchers(chain) {
            let source = fetcher.source();
            match fetcher.fetch_manifest(application, manifest_url).await {
                Ok(Some(bytes)) => match Manifest::parse(&bytes) {
                    Ok(manifest) => {
                        debug!(url = %manifest_url, %source, modules = manifest.len(), "manifest resolved");
                        self.emit(LoadEvent::ManifestFetched {
                            url: manifest_url.to_string(),
                            source,
                        })
                        .await;
                        return Ok(manifest.resolve_urls(manifest_url));
                    }
                    Err(e) => warn!(url = %manifest_url, %source, error = %e, "ignoring unreadable manifest"),
                },
                Ok(None) => debug!(url = %manifest_url, %source, "no manifest"),
                Err(e) => warn!(url = %manifest_url, %source, error = %e, "manifest source failed"),
            }
        }
        Err(ShiploadError::ManifestUnavailable {
            url: manifest_url.to_string(),
        })
    }

    /// Pin the manifest, report success and prune
    async fn after_load(&self, application: &str, manifest_url: Option<&str>, manifest: &Manifest) {
        if let Some(url) = manifest_url {
            if let Err(e) = self.cache.pin_manifest(url, manifest) {
                warn!(url, error = %e, "failed to pin manifest");
            }
        }

        info!(application, modules = manifest.len(), "load succeeded");
        self.emit(LoadEvent::LoadSucceeded {
            application: application.to_string(),
            modules: manifest.len(),
        })
        .await;

        if self.options.prune_after_load {
            match self.cache.prune_to_budget() {
                Ok(0) => {}
                Ok(removed) => self.emit(LoadEvent::CachePruned { removed }).await,
                Err(e) => warn!(error = %e, "cache prune failed"),
            }
        }
    }

    async fn report_failure(&self, application: &str, error: &ShiploadError) {
        warn!(application, kind = %error.kind(), error = %error, "load failed");
        self.emit(LoadEvent::LoadFailed {
            application: application.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        })
        .await;
    }

    async fn emit(&self, event: LoadEvent) {
        self.listener.on_event(&event).await;
    }
}
