//! Module loader
//!
//! Fetches every module of a manifest through the fetcher chain and hands
//! the verified bytes to a `Receiver` in dependency order.
//!
//! Fetches run concurrently, bounded by a semaphore, and may complete in any
//! order. Completed fetches wait in a ready buffer keyed by load-order
//! position until every earlier position has been delivered.

use crate::cache::ContentCache;
use crate::error::{ShiploadError, ShiploadResult};
use crate::events::{EventListener, LoadEvent, NoopListener};
use crate::fetch::{fetch_from_chain, CacheFetcher, EmbeddedFetcher, Fetcher, NetworkFetcher};
use crate::manifest::{resolve_load_order, Digest, Manifest, Module};
use crate::runtime::ExecutionContext;
use crate::transport::Transport;
use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// Default number of simultaneous module fetches
pub const DEFAULT_CONCURRENT_DOWNLOADS: usize = 3;

/// Consumes verified module bytes, in dependency order
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn receive(&self, bytes: &[u8], id: &str, sha256: &Digest) -> ShiploadResult<()>;
}

/// Runs each module in a live execution context
pub struct ContextReceiver {
    context: Arc<dyn ExecutionContext>,
}

impl ContextReceiver {
    pub fn new(context: Arc<dyn ExecutionContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Receiver for ContextReceiver {
    async fn receive(&self, bytes: &[u8], id: &str, _sha256: &Digest) -> ShiploadResult<()> {
        self.context
            .run_module(id, bytes)
            .await
            .map_err(|e| ShiploadError::receiver(id, e))
    }
}

/// Persists each module as `<directory>/<hex digest>`
pub struct DirectoryReceiver {
    directory: PathBuf,
}

impl DirectoryReceiver {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl Receiver for DirectoryReceiver {
    async fn receive(&self, bytes: &[u8], id: &str, sha256: &Digest) -> ShiploadResult<()> {
        let dest = self.directory.join(sha256.to_hex());
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(module = %id, path = %dest.display(), "already downloaded");
            return Ok(());
        }
        write_atomically(&dest, bytes).await
    }
}

/// Write `bytes` to a sibling temp file and rename it over `dest`
pub(crate) async fn write_atomically(dest: &Path, bytes: &[u8]) -> ShiploadResult<()> {
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    let write = async {
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, dest).await
    };
    if let Err(e) = write.await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ShiploadError::io(format!("writing {}", dest.display()), e));
    }
    Ok(())
}

/// Drives one manifest through a fetcher chain into a receiver
pub struct ModuleLoader {
    fetchers: Vec<Arc<dyn Fetcher>>,
    receiver: Arc<dyn Receiver>,
    gate: Arc<Semaphore>,
    listener: Arc<dyn EventListener>,
}

impl ModuleLoader {
    pub fn new(
        fetchers: Vec<Arc<dyn Fetcher>>,
        receiver: Arc<dyn Receiver>,
        gate: Arc<Semaphore>,
    ) -> Self {
        Self {
            fetchers,
            receiver,
            gate,
            listener: Arc::new(NoopListener),
        }
    }

    /// Loader that runs modules in `context`
    pub fn production(
        fetchers: Vec<Arc<dyn Fetcher>>,
        context: Arc<dyn ExecutionContext>,
        gate: Arc<Semaphore>,
    ) -> Self {
        Self::new(fetchers, Arc::new(ContextReceiver::new(context)), gate)
    }

    /// Loader that only persists modules into `directory`.
    ///
    /// Modules already present in `directory` are not downloaded again.
    pub fn download_only(
        directory: &Path,
        transport: Arc<dyn Transport>,
        cache: Option<Arc<ContentCache>>,
        gate: Arc<Semaphore>,
    ) -> Self {
        let mut fetchers: Vec<Arc<dyn Fetcher>> = vec![Arc::new(EmbeddedFetcher::new(directory))];
        let mut network = NetworkFetcher::new(transport);
        if let Some(cache) = cache {
            fetchers.push(Arc::new(CacheFetcher::new(cache.clone())));
            network = network.with_cache(cache);
        }
        fetchers.push(Arc::new(network));
        Self::new(fetchers, Arc::new(DirectoryReceiver::new(directory)), gate)
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Load every module of `manifest`
    pub async fn load(&self, manifest: &Manifest) -> ShiploadResult<()> {
        self.load_with_cancel(manifest, &CancellationToken::new()).await
    }

    /// Load every module of `manifest`, giving up with `Cancelled` as soon as
    /// `cancel` fires. In-flight fetches are dropped and their permits freed.
    pub async fn load_with_cancel(
        &self,
        manifest: &Manifest,
        cancel: &CancellationToken,
    ) -> ShiploadResult<()> {
        let order = resolve_load_order(manifest)?;
        let session = Uuid::new_v4();
        let span = info_span!("load", session = %session, modules = order.len());

        let run = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("load cancelled");
                    Err(ShiploadError::Cancelled)
                }
                result = self.deliver_in_order(manifest, &order) => result,
            }
        };
        run.instrument(span).await
    }

    async fn deliver_in_order(&self, manifest: &Manifest, order: &[String]) -> ShiploadResult<()> {
        let mut pending = FuturesUnordered::new();
        for (position, id) in order.iter().enumerate() {
            let module = manifest
                .get(id)
                .ok_or_else(|| ShiploadError::Internal(format!("module '{}' vanished", id)))?;
            pending.push(self.fetch_module(position, id, module));
        }

        // Fetches keep running while the receiver is busy with earlier modules.
        let (fetched_tx, mut fetched_rx) = mpsc::unbounded_channel();
        let fetch_all = async move {
            while let Some(fetched) = pending.next().await {
                if fetched_tx.send(fetched?).is_err() {
                    break;
                }
            }
            Ok::<_, ShiploadError>(())
        };

        let deliver = async {
            let mut ready: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
            let mut next = 0;
            while next < order.len() {
                let Some((position, bytes)) = fetched_rx.recv().await else {
                    break;
                };
                ready.insert(position, bytes);

                while let Some(bytes) = ready.remove(&next) {
                    let id = &order[next];
                    let sha256 = manifest.get(id).map(|m| m.sha256).ok_or_else(|| {
                        ShiploadError::Internal(format!("module '{}' vanished", id))
                    })?;
                    self.receiver.receive(&bytes, id, &sha256).await?;
                    debug!(module = %id, position = next, "delivered");
                    next += 1;
                }
            }

            if next < order.len() {
                return Err(ShiploadError::Internal(format!(
                    "load stopped after {} of {} modules",
                    next,
                    order.len()
                )));
            }
            Ok::<_, ShiploadError>(())
        };

        tokio::try_join!(fetch_all, deliver)?;
        info!("loaded {} modules", order.len());
        Ok(())
    }

    async fn fetch_module(
        &self,
        position: usize,
        id: &str,
        module: &Module,
    ) -> ShiploadResult<(usize, Vec<u8>)> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ShiploadError::Internal("concurrency gate closed".to_string()))?;

        let (bytes, source) = fetch_from_chain(&self.fetchers, id, module).await?;
        self.listener
            .on_event(&LoadEvent::ModuleFetched {
                id: id.to_string(),
                sha256: module.sha256.to_hex(),
                source,
            })
            .await;
        Ok((position, bytes))
    }
}
