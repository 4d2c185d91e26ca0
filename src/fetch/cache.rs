use crate::cache::ContentCache;
use crate::error::ShiploadResult;
use crate::fetch::{FetchSource, Fetcher};
use crate::manifest::Module;
use async_trait::async_trait;
use std::sync::Arc;

/// Serves modules already in the content cache and the last pinned manifest
#[derive(Clone)]
pub struct CacheFetcher {
    cache: Arc<ContentCache>,
}

impl CacheFetcher {
    pub fn new(cache: Arc<ContentCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Fetcher for CacheFetcher {
    fn source(&self) -> FetchSource {
        FetchSource::Cache
    }

    async fn fetch(&self, _id: &str, module: &Module) -> ShiploadResult<Option<Vec<u8>>> {
        self.cache.read(&module.sha256).await
    }

    async fn fetch_manifest(
        &self,
        _application: &str,
        manifest_url: &str,
    ) -> ShiploadResult<Option<Vec<u8>>> {
        Ok(self
            .cache
            .pinned_manifest(manifest_url)?
            .map(String::into_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use crate::manifest::{Digest, Manifest};
    use tempfile::TempDir;

    #[tokio::test]
    async fn hits_after_write_and_serves_pinned_manifest() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(
            ContentCache::open(CacheOptions {
                directory: dir.path().to_path_buf(),
                max_size_bytes: 1024,
            })
            .unwrap(),
        );
        let fetcher = CacheFetcher::new(cache.clone());
        let module = Module::new("alpha.bin", Digest::of(b"alpha"));

        assert!(fetcher.fetch("alpha", &module).await.unwrap().is_none());
        cache
            .get_or_put(&module.sha256, || async { Ok(b"alpha".to_vec()) })
            .await
            .unwrap();
        assert_eq!(
            fetcher.fetch("alpha", &module).await.unwrap().unwrap(),
            b"alpha"
        );

        let url = "https://example.com/manifest.json";
        assert!(fetcher.fetch_manifest("red", url).await.unwrap().is_none());
        cache.pin_manifest(url, &Manifest::default()).unwrap();
        assert_eq!(
            fetcher.fetch_manifest("red", url).await.unwrap().unwrap(),
            br#"{"modules":{}}"#
        );
    }
}
