//! Download command - bundle a manifest and its modules for offline use

use crate::cache::{CacheOptions, ContentCache};
use crate::cli::args::DownloadArgs;
use crate::config::{Config, ConfigManager};
use crate::download::Downloader;
use crate::error::ShiploadResult;
use crate::events::JsonLinesListener;
use crate::transport::{HttpTransport, TransportOptions};
use crate::ui;
use std::sync::Arc;
use tracing::debug;

/// Execute the download command
pub async fn execute(args: DownloadArgs, config: &Config) -> ShiploadResult<()> {
    let transport = Arc::new(HttpTransport::new(TransportOptions::from(&config.network)));
    let mut downloader = Downloader::new(&args.download_dir, transport)
        .with_concurrency(config.loader.concurrent_downloads)
        .with_listener(Arc::new(JsonLinesListener::new(config)));

    if args.use_cache {
        let directory = ConfigManager::cache_dir(config);
        debug!("Using module cache at {}", directory.display());
        let cache = ContentCache::open(CacheOptions {
            directory,
            max_size_bytes: config.cache.max_size_bytes,
        })?;
        downloader = downloader.with_cache(Arc::new(cache));
    }

    let manifest = downloader.download(&args.manifest_url).await?;

    ui::step_ok_detail(
        &format!("Downloaded {} module(s)", manifest.len()),
        &args.download_dir.display().to_string(),
    );
    Ok(())
}
