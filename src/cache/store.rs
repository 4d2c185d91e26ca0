//! Content cache
//!
//! Payloads live in `<directory>/entries/<hex digest>`; their size and last
//! access time live in the SQLite index. A payload file is written and
//! renamed into place before its index row is committed, so a row never
//! points at a partially written file. Rows whose file vanished and files
//! without a row are cleaned up when the cache is opened.

use crate::cache::index::{CacheEntry, CacheIndex};
use crate::error::{ShiploadError, ShiploadResult};
use crate::manifest::{Digest, Manifest};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const ENTRIES_DIR: &str = "entries";
const TMP_DIR: &str = "tmp";
const INDEX_FILENAME: &str = "index.sqlite";

/// Millisecond clock used for last-access bookkeeping
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

/// Cache construction options
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Root directory holding payloads and the index
    pub directory: PathBuf,
    /// Byte budget enforced by `prune_to_budget`
    pub max_size_bytes: u64,
}

struct CacheState {
    index: CacheIndex,
    /// Digests currently being read or written, with a reference count
    pins: HashMap<String, usize>,
}

/// Content-addressed byte store with LRU pruning
pub struct ContentCache {
    directory: PathBuf,
    max_size_bytes: u64,
    state: Mutex<CacheState>,
    now_ms: Clock,
}

/// Keeps a digest out of reach of `prune` while alive
struct PinGuard<'a> {
    cache: &'a ContentCache,
    key: String,
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.cache.state.lock();
        if let Some(count) = state.pins.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                state.pins.remove(&self.key);
            }
        }
    }
}

impl ContentCache {
    /// Open (or create) a cache, recovering from any interrupted writes
    pub fn open(options: CacheOptions) -> ShiploadResult<Self> {
        Self::open_with_clock(options, system_clock())
    }

    /// Open a cache with an explicit clock
    pub fn open_with_clock(options: CacheOptions, now_ms: Clock) -> ShiploadResult<Self> {
        for dir in [ENTRIES_DIR, TMP_DIR] {
            let path = options.directory.join(dir);
            std::fs::create_dir_all(&path)
                .map_err(|e| ShiploadError::io(format!("creating cache directory {}", path.display()), e))?;
        }

        let index = CacheIndex::open(&options.directory.join(INDEX_FILENAME))?;
        let cache = Self {
            directory: options.directory,
            max_size_bytes: options.max_size_bytes,
            state: Mutex::new(CacheState {
                index,
                pins: HashMap::new(),
            }),
            now_ms,
        };
        cache.recover()?;
        Ok(cache)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Return the cached bytes for `digest`, refreshing its last access time.
    ///
    /// Never touches the network. A payload that is missing on disk or no
    /// longer hashes to its key is dropped and reported as a miss.
    pub async fn read(&self, digest: &Digest) -> ShiploadResult<Option<Vec<u8>>> {
        let key = digest.to_hex();
        let _pin = {
            let mut state = self.state.lock();
            if state.index.get(&key)?.is_none() {
                return Ok(None);
            }
            state.index.touch(&key, (self.now_ms)())?;
            self.pin_locked(&mut state, &key)
        };

        let path = self.entry_path(&key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(sha256 = %key, "cache row without payload, dropping");
                self.state.lock().index.remove(&key)?;
                return Ok(None);
            }
            Err(e) => {
                return Err(ShiploadError::io(format!("reading cache entry {}", path.display()), e))
            }
        };

        if !digest.matches(&bytes) {
            warn!(sha256 = %key, "corrupt cache payload, dropping");
            self.delete(digest)?;
            return Ok(None);
        }

        debug!(sha256 = %key, size = bytes.len(), "cache hit");
        Ok(Some(bytes))
    }

    /// Return the cached bytes for `digest`, or produce, store and return them.
    ///
    /// The supplier runs only on a miss. Its output must hash to `digest`;
    /// anything else is rejected and nothing is committed.
    pub async fn get_or_put<F, Fut>(&self, digest: &Digest, supplier: F) -> ShiploadResult<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ShiploadResult<Vec<u8>>>,
    {
        if let Some(bytes) = self.read(digest).await? {
            return Ok(bytes);
        }

        let bytes = supplier().await?;
        let key = digest.to_hex();
        let actual = Digest::of(&bytes);
        if actual != *digest {
            return Err(ShiploadError::IntegrityViolation {
                id: key,
                expected: digest.to_hex(),
                actual: actual.to_hex(),
            });
        }

        let _pin = {
            let mut state = self.state.lock();
            self.pin_locked(&mut state, &key)
        };
        self.write_payload(&key, &bytes).await?;
        self.state
            .lock()
            .index
            .upsert(&key, bytes.len() as u64, (self.now_ms)())?;

        debug!(sha256 = %key, size = bytes.len(), "cache write");
        Ok(bytes)
    }

    /// Evict least recently used entries until at most `target_max_bytes`
    /// are tracked. Entries in use and entries referenced by a pinned
    /// manifest are skipped. Returns the number removed.
    pub fn prune(&self, target_max_bytes: u64) -> ShiploadResult<usize> {
        let mut state = self.state.lock();
        let mut total = state.index.total_size()?;
        if total <= target_max_bytes {
            return Ok(0);
        }

        let referenced = state.index.referenced_keys()?;
        let mut evicted = Vec::new();
        for entry in state.index.entries_by_age()? {
            if total <= target_max_bytes {
                break;
            }
            if state.pins.contains_key(&entry.key) || referenced.contains(&entry.key) {
                debug!(sha256 = %entry.key, "skipping pinned entry");
                continue;
            }
            total = total.saturating_sub(entry.size_bytes);
            evicted.push(entry.key);
        }

        let removed = state.index.remove_all(&evicted)?;
        for key in &evicted {
            remove_file_if_exists(&self.entry_path(key))?;
        }

        if total > target_max_bytes {
            warn!(
                remaining_bytes = total,
                limit_bytes = target_max_bytes,
                "cache prune could not reach limit, entries are pinned"
            );
        }
        info!(removed, limit_bytes = target_max_bytes, "cache pruned");
        Ok(removed)
    }

    /// Prune down to the configured byte budget
    pub fn prune_to_budget(&self) -> ShiploadResult<usize> {
        self.prune(self.max_size_bytes)
    }

    /// Explicitly delete one entry. Returns whether it was tracked.
    pub fn delete(&self, digest: &Digest) -> ShiploadResult<bool> {
        let key = digest.to_hex();
        let state = self.state.lock();
        let removed = state.index.remove(&key)?;
        remove_file_if_exists(&self.entry_path(&key))?;
        Ok(removed)
    }

    /// Number of tracked entries
    pub fn count_files(&self) -> ShiploadResult<usize> {
        self.state.lock().index.count()
    }

    /// Sum of tracked payload sizes
    pub fn total_size_bytes(&self) -> ShiploadResult<u64> {
        self.state.lock().index.total_size()
    }

    /// Tracked entries, least recently used first
    pub fn entries(&self) -> ShiploadResult<Vec<CacheEntry>> {
        self.state.lock().index.entries_by_age()
    }

    /// Remember the manifest that last loaded successfully from `manifest_url`.
    ///
    /// Its modules stay out of reach of `prune` until another manifest is
    /// pinned for the same URL, so the last good version can always be
    /// loaded offline.
    pub fn pin_manifest(&self, manifest_url: &str, manifest: &Manifest) -> ShiploadResult<()> {
        let json = manifest.to_json()?;
        let keys: Vec<String> = manifest
            .modules()
            .map(|(_, module)| module.sha256.to_hex())
            .collect();
        self.state
            .lock()
            .index
            .put_manifest(manifest_url, &json, &keys, (self.now_ms)())
    }

    /// The last manifest pinned for `manifest_url`
    pub fn pinned_manifest(&self, manifest_url: &str) -> ShiploadResult<Option<String>> {
        self.state.lock().index.get_manifest(manifest_url)
    }

    fn pin_locked(&self, state: &mut CacheState, key: &str) -> PinGuard<'_> {
        *state.pins.entry(key.to_string()).or_insert(0) += 1;
        PinGuard {
            cache: self,
            key: key.to_string(),
        }
    }

    async fn write_payload(&self, key: &str, bytes: &[u8]) -> ShiploadResult<()> {
        let tmp = self
            .directory
            .join(TMP_DIR)
            .join(format!("{}.{}.tmp", key, uuid::Uuid::new_v4()));
        let dest = self.entry_path(key);

        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            tokio::io::AsyncWriteExt::write_all(&mut file, bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &dest).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ShiploadError::io(format!("writing cache entry {}", dest.display()), e));
        }
        Ok(())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.directory.join(ENTRIES_DIR).join(key)
    }

    /// Reconcile the index with the payload directory after a restart
    fn recover(&self) -> ShiploadResult<()> {
        let mut state = self.state.lock();

        let dangling: Vec<String> = state
            .index
            .entries_by_age()?
            .into_iter()
            .filter(|entry| !self.entry_path(&entry.key).exists())
            .map(|entry| entry.key)
            .collect();
        if !dangling.is_empty() {
            warn!(count = dangling.len(), "dropping cache rows without payloads");
            state.index.remove_all(&dangling)?;
        }

        let entries_dir = self.directory.join(ENTRIES_DIR);
        let listing = std::fs::read_dir(&entries_dir)
            .map_err(|e| ShiploadError::io(format!("listing {}", entries_dir.display()), e))?;
        for entry in listing.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if state.index.get(&name)?.is_none() {
                debug!(file = %name, "removing orphaned cache payload");
                remove_file_if_exists(&entry.path())?;
            }
        }

        let tmp_dir = self.directory.join(TMP_DIR);
        if let Ok(listing) = std::fs::read_dir(&tmp_dir) {
            for entry in listing.flatten() {
                remove_file_if_exists(&entry.path())?;
            }
        }
        Ok(())
    }
}

fn remove_file_if_exists(path: &Path) -> ShiploadResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ShiploadError::io(format!("removing {}", path.display()), e)),
    }
}
