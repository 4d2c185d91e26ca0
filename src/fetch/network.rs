//! Network fetcher
//!
//! Downloads a module from its URL, verifies it, and writes it through to the
//! content cache when one is attached. Transport failures are misses: the
//! network is the last fetcher, so they surface as `ModuleUnavailable`.

use crate::cache::ContentCache;
use crate::error::{ShiploadError, ShiploadResult};
use crate::fetch::{verify, FetchSource, Fetcher};
use crate::manifest::Module;
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct NetworkFetcher {
    transport: Arc<dyn Transport>,
    cache: Option<Arc<ContentCache>>,
}

impl NetworkFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cache: None,
        }
    }

    /// Write every verified download through to `cache`
    pub fn with_cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Download and verify the full module.
    ///
    /// A patch advertised by the manifest is logged but never applied; the
    /// full `url` is always downloaded.
    async fn download(&self, id: &str, module: &Module) -> ShiploadResult<Vec<u8>> {
        if let (Some(patch_from), Some(patch_url)) = (&module.patch_from, &module.patch_url) {
            debug!(module = %id, %patch_from, %patch_url, "patch advertised, downloading full module");
        }
        let bytes = self.transport.fetch(&module.url).await?;
        verify(id, &module.sha256, &bytes)?;
        Ok(bytes)
    }
}

#[async_trait]
impl Fetcher for NetworkFetcher {
    fn source(&self) -> FetchSource {
        FetchSource::Network
    }

    async fn fetch(&self, id: &str, module: &Module) -> ShiploadResult<Option<Vec<u8>>> {
        let result = match &self.cache {
            Some(cache) => {
                cache
                    .get_or_put(&module.sha256, || self.download(id, module))
                    .await
            }
            None => self.download(id, module).await,
        };

        match result {
            Ok(bytes) => Ok(Some(bytes)),
            Err(ShiploadError::Transport { url, reason }) => {
                warn!(module = %id, %url, %reason, "network fetch failed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_manifest(
        &self,
        _application: &str,
        manifest_url: &str,
    ) -> ShiploadResult<Option<Vec<u8>>> {
        match self.transport.fetch(manifest_url).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(ShiploadError::Transport { url, reason }) => {
                warn!(%url, %reason, "manifest fetch failed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
