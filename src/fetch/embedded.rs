//! Fetcher over a directory of `<hex digest>` files
//!
//! Serves both the snapshot bundled with an application and the output of a
//! previous `Downloader` run, which share the same layout.

use crate::error::{ShiploadError, ShiploadResult};
use crate::fetch::{FetchSource, Fetcher};
use crate::manifest::{application_manifest_file_name, Module, PREBUILT_MANIFEST_FILE_NAME};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read-only directory of modules and manifests
#[derive(Debug, Clone)]
pub struct EmbeddedFetcher {
    directory: PathBuf,
}

impl EmbeddedFetcher {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    async fn read_optional(&self, name: &str) -> ShiploadResult<Option<Vec<u8>>> {
        let path = self.directory.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ShiploadError::io(format!("reading {}", path.display()), e)),
        }
    }
}

#[async_trait]
impl Fetcher for EmbeddedFetcher {
    fn source(&self) -> FetchSource {
        FetchSource::Embedded
    }

    async fn fetch(&self, _id: &str, module: &Module) -> ShiploadResult<Option<Vec<u8>>> {
        self.read_optional(&module.sha256.to_hex()).await
    }

    /// The application's own manifest wins over the generic prebuilt one
    async fn fetch_manifest(
        &self,
        application: &str,
        _manifest_url: &str,
    ) -> ShiploadResult<Option<Vec<u8>>> {
        for name in [
            application_manifest_file_name(application),
            PREBUILT_MANIFEST_FILE_NAME.to_string(),
        ] {
            if let Some(bytes) = self.read_optional(&name).await? {
                debug!(file = %name, directory = %self.directory.display(), "embedded manifest");
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }
}
