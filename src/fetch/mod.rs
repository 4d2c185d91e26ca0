//! Fetcher chain
//!
//! A module's bytes may come from a read-only embedded snapshot, the local
//! content cache, or the network. Fetchers are tried in that order and the
//! first one that does not miss wins. Whatever the source, the bytes must
//! hash to the digest the manifest declares.

mod cache;
mod embedded;
mod network;

pub use cache::CacheFetcher;
pub use embedded::EmbeddedFetcher;
pub use network::NetworkFetcher;

use crate::error::{ShiploadError, ShiploadResult};
use crate::manifest::{Digest, Module};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Where a module or manifest came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchSource {
    Embedded,
    Cache,
    Network,
}

impl FetchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::Cache => "cache",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for FetchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source of module bytes.
///
/// `Ok(None)` is a miss and lets the next fetcher try. Implementations may be
/// called for several modules at once and in any order.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn source(&self) -> FetchSource;

    /// Bytes for module `id`, or `None` on a miss
    async fn fetch(&self, id: &str, module: &Module) -> ShiploadResult<Option<Vec<u8>>>;

    /// Manifest bytes for `application` published at `manifest_url`
    async fn fetch_manifest(
        &self,
        _application: &str,
        _manifest_url: &str,
    ) -> ShiploadResult<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Check that `bytes` hash to the digest declared for module `id`
pub fn verify(id: &str, expected: &Digest, bytes: &[u8]) -> ShiploadResult<()> {
    let actual = Digest::of(bytes);
    if actual != *expected {
        return Err(ShiploadError::IntegrityViolation {
            id: id.to_string(),
            expected: expected.to_hex(),
            actual: actual.to_hex(),
        });
    }
    Ok(())
}

/// Try each fetcher in order and return the first verified hit
pub async fn fetch_from_chain(
    fetchers: &[Arc<dyn Fetcher>],
    id: &str,
    module: &Module,
) -> ShiploadResult<(Vec<u8>, FetchSource)> {
    for fetcher in fetchers {
        let source = fetcher.source();
        let Some(bytes) = fetcher.fetch(id, module).await? else {
            debug!(module = %id, %source, "miss");
            continue;
        };
        verify(id, &module.sha256, &bytes)?;
        debug!(module = %id, %source, size = bytes.len(), "fetched");
        return Ok((bytes, source));
    }
    Err(ShiploadError::ModuleUnavailable { id: id.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        source: FetchSource,
        bytes: Option<Vec<u8>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(source: FetchSource, bytes: Option<&[u8]>) -> Arc<Self> {
            Arc::new(Self {
                source,
                bytes: bytes.map(<[u8]>::to_vec),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Fetcher for Scripted {
        fn source(&self) -> FetchSource {
            self.source
        }

        async fn fetch(&self, _id: &str, _module: &Module) -> ShiploadResult<Option<Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.clone())
        }
    }

    #[tokio::test]
    async fn first_hit_wins() {
        let module = Module::new("alpha.bin", Digest::of(b"alpha"));
        let embedded = Scripted::new(FetchSource::Embedded, None);
        let cache = Scripted::new(FetchSource::Cache, Some(b"alpha"));
        let network = Scripted::new(FetchSource::Network, Some(b"alpha"));
        let chain: Vec<Arc<dyn Fetcher>> = vec![embedded.clone(), cache.clone(), network.clone()];

        let (bytes, source) = fetch_from_chain(&chain, "alpha", &module).await.unwrap();
        assert_eq!(bytes, b"alpha");
        assert_eq!(source, FetchSource::Cache);
        assert_eq!(embedded.calls.load(Ordering::SeqCst), 1);
        assert_eq!(network.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_misses_is_unavailable() {
        let module = Module::new("alpha.bin", Digest::of(b"alpha"));
        let chain: Vec<Arc<dyn Fetcher>> = vec![
            Scripted::new(FetchSource::Embedded, None),
            Scripted::new(FetchSource::Network, None),
        ];

        let err = fetch_from_chain(&chain, "alpha", &module).await.unwrap_err();
        assert!(matches!(err, ShiploadError::ModuleUnavailable { ref id } if id == "alpha"));
    }

    #[tokio::test]
    async fn mismatch_from_any_source_is_rejected() {
        let module = Module::new("alpha.bin", Digest::of(b"alpha"));
        let chain: Vec<Arc<dyn Fetcher>> =
            vec![Scripted::new(FetchSource::Embedded, Some(b"tampered"))];

        let err = fetch_from_chain(&chain, "alpha", &module).await.unwrap_err();
        assert!(matches!(err, ShiploadError::IntegrityViolation { ref id, .. } if id == "alpha"));
    }
}
