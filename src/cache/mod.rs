//! Content-addressed module cache
//!
//! Stores module payloads keyed by their SHA-256 digest, with a persisted
//! index of sizes and last-access times used for LRU pruning.
//!
//! # Consistency Model
//!
//! - The digest is the key, so a stored payload is immutable
//! - A payload is visible only once both its file and its index row exist
//! - Entries being read or written are pinned and never evicted mid-use
//! - Modules of every pinned manifest are never evicted
//! - Opening the cache drops rows without payloads and payloads without rows
//!
//! # Layout
//!
//! | Path | Contents |
//! |------|----------|
//! | `entries/<hex>` | payload bytes |
//! | `tmp/` | in-progress writes |
//! | `index.sqlite` | sizes, access times, pinned manifests and their digests |

pub mod index;
pub mod store;

pub use index::CacheEntry;
pub use store::{CacheOptions, Clock, ContentCache};

/// Format bytes as human-readable size (e.g., "1.5 MB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
