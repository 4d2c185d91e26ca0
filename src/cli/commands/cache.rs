//! Cache command - inspect and prune the module cache

use crate::cache::{format_bytes, CacheEntry, CacheOptions, ContentCache};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::ShiploadResult;
use crate::ui;
use chrono::{TimeZone, Utc};

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> ShiploadResult<()> {
    let cache = ContentCache::open(CacheOptions {
        directory: ConfigManager::cache_dir(config),
        max_size_bytes: config.cache.max_size_bytes,
    })?;

    match args.action {
        CacheAction::Info => show_info(&cache),
        CacheAction::List { format } => list_entries(&cache, format),
        CacheAction::Prune { max_bytes } => prune(&cache, max_bytes),
    }
}

fn show_info(cache: &ContentCache) -> ShiploadResult<()> {
    ui::section("Module cache");
    ui::key_value("Directory", &cache.directory().display().to_string());
    ui::key_value("Modules", &cache.count_files()?.to_string());
    ui::key_value("Size", &format_bytes(cache.total_size_bytes()?));
    ui::key_value("Budget", &format_bytes(cache.max_size_bytes()));
    Ok(())
}

fn list_entries(cache: &ContentCache, format: OutputFormat) -> ShiploadResult<()> {
    let entries = cache.entries()?;

    match format {
        OutputFormat::Table => print_entry_table(&entries),
        OutputFormat::Json => print_entry_json(&entries)?,
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.key);
            }
        }
    }
    Ok(())
}

fn last_accessed(entry: &CacheEntry) -> String {
    Utc.timestamp_millis_opt(entry.last_accessed_at_ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_entry_table(entries: &[CacheEntry]) {
    if entries.is_empty() {
        println!("No cached modules.");
        return;
    }

    println!("{:<64} {:>10} {:<16}", "SHA256", "SIZE", "LAST ACCESS");
    println!("{}", "-".repeat(92));
    for entry in entries {
        println!(
            "{:<64} {:>10} {:<16}",
            entry.key,
            format_bytes(entry.size_bytes),
            last_accessed(entry)
        );
    }
    println!();
    println!("Total: {} module(s)", entries.len());
}

fn print_entry_json(entries: &[CacheEntry]) -> ShiploadResult<()> {
    #[derive(serde::Serialize)]
    struct EntryJson<'a> {
        sha256: &'a str,
        size_bytes: u64,
        last_accessed: String,
    }

    let json: Vec<EntryJson<'_>> = entries
        .iter()
        .map(|e| EntryJson {
            sha256: &e.key,
            size_bytes: e.size_bytes,
            last_accessed: last_accessed(e),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn prune(cache: &ContentCache, max_bytes: Option<u64>) -> ShiploadResult<()> {
    let limit = max_bytes.unwrap_or_else(|| cache.max_size_bytes());
    let removed = cache.prune(limit)?;

    if removed == 0 {
        ui::step_ok(&format!(
            "Cache already within {}",
            format_bytes(limit)
        ));
    } else {
        ui::step_ok_detail(
            &format!("Removed {} module(s)", removed),
            &format!("{} remaining", format_bytes(cache.total_size_bytes()?)),
        );
    }
    Ok(())
}
