//! Persistent cache index
//!
//! One SQLite table maps a hex digest to the payload size and the time it
//! was last read or written. A second table keeps the last manifest that
//! loaded successfully for each manifest URL, and a third records which
//! digests each pinned manifest references.

use crate::error::ShiploadResult;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Index row for one cached payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Hex-encoded digest
    pub key: String,
    pub size_bytes: u64,
    pub last_accessed_at_ms: i64,
}

pub(crate) struct CacheIndex {
    conn: Connection,
}

impl CacheIndex {
    pub(crate) fn open(path: &Path) -> ShiploadResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let index = Self { conn };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> ShiploadResult<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                size_bytes INTEGER NOT NULL,
                last_accessed_at_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS manifests (
                manifest_url TEXT PRIMARY KEY,
                manifest_json TEXT NOT NULL,
                pinned_at_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS manifest_refs (
                manifest_url TEXT NOT NULL,
                key TEXT NOT NULL,
                PRIMARY KEY (manifest_url, key)
            );
            "#,
        )?;
        Ok(())
    }

    pub(crate) fn get(&self, key: &str) -> ShiploadResult<Option<CacheEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT key, size_bytes, last_accessed_at_ms FROM entries WHERE key = ?1",
                params![key],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    pub(crate) fn touch(&self, key: &str, now_ms: i64) -> ShiploadResult<()> {
        self.conn.execute(
            "UPDATE entries SET last_accessed_at_ms = ?1 WHERE key = ?2",
            params![now_ms, key],
        )?;
        Ok(())
    }

    /// Commit an entry. The last write for a key wins.
    pub(crate) fn upsert(&mut self, key: &str, size_bytes: u64, now_ms: i64) -> ShiploadResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO entries(key, size_bytes, last_accessed_at_ms) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET size_bytes = excluded.size_bytes, \
             last_accessed_at_ms = excluded.last_accessed_at_ms",
            params![key, size_bytes as i64, now_ms],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn remove(&self, key: &str) -> ShiploadResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM entries WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    /// Remove several entries in one transaction
    pub(crate) fn remove_all(&mut self, keys: &[String]) -> ShiploadResult<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut removed = 0;
        for key in keys {
            removed += tx.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// All entries, least recently used first
    pub(crate) fn entries_by_age(&self) -> ShiploadResult<Vec<CacheEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT key, size_bytes, last_accessed_at_ms FROM entries \
             ORDER BY last_accessed_at_ms ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub(crate) fn count(&self) -> ShiploadResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub(crate) fn total_size(&self) -> ShiploadResult<u64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM entries",
            [],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    /// Replace the pinned manifest for `manifest_url` and the digests it
    /// references, in one transaction
    pub(crate) fn put_manifest(
        &mut self,
        manifest_url: &str,
        manifest_json: &str,
        keys: &[String],
        now_ms: i64,
    ) -> ShiploadResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO manifests(manifest_url, manifest_json, pinned_at_ms) VALUES (?1, ?2, ?3) \
             ON CONFLICT(manifest_url) DO UPDATE SET manifest_json = excluded.manifest_json, \
             pinned_at_ms = excluded.pinned_at_ms",
            params![manifest_url, manifest_json, now_ms],
        )?;
        tx.execute(
            "DELETE FROM manifest_refs WHERE manifest_url = ?1",
            params![manifest_url],
        )?;
        for key in keys {
            tx.execute(
                "INSERT OR IGNORE INTO manifest_refs(manifest_url, key) VALUES (?1, ?2)",
                params![manifest_url, key],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Digests referenced by any pinned manifest
    pub(crate) fn referenced_keys(&self) -> ShiploadResult<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT key FROM manifest_refs")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(keys)
    }

    pub(crate) fn get_manifest(&self, manifest_url: &str) -> ShiploadResult<Option<String>> {
        let json = self
            .conn
            .query_row(
                "SELECT manifest_json FROM manifests WHERE manifest_url = ?1",
                params![manifest_url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        key: row.get(0)?,
        size_bytes: row.get::<_, i64>(1)? as u64,
        last_accessed_at_ms: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_index(dir: &TempDir) -> CacheIndex {
        CacheIndex::open(&dir.path().join("index.sqlite")).unwrap()
    }

    #[test]
    fn upsert_then_get() {
        let dir = TempDir::new().unwrap();
        let mut index = open_index(&dir);

        index.upsert("aa", 10, 1_000).unwrap();
        let entry = index.get("aa").unwrap().unwrap();
        assert_eq!(entry.size_bytes, 10);
        assert_eq!(entry.last_accessed_at_ms, 1_000);
        assert!(index.get("bb").unwrap().is_none());
    }

    #[test]
    fn last_write_wins() {
        let dir = TempDir::new().unwrap();
        let mut index = open_index(&dir);

        index.upsert("aa", 10, 1_000).unwrap();
        index.upsert("aa", 12, 2_000).unwrap();
        assert_eq!(index.count().unwrap(), 1);
        assert_eq!(index.total_size().unwrap(), 12);
    }

    #[test]
    fn entries_ordered_by_last_access() {
        let dir = TempDir::new().unwrap();
        let mut index = open_index(&dir);

        index.upsert("first", 1, 1_000).unwrap();
        index.upsert("second", 1, 2_000).unwrap();
        index.upsert("third", 1, 3_000).unwrap();
        index.touch("first", 4_000).unwrap();

        let keys: Vec<String> = index
            .entries_by_age()
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["second", "third", "first"]);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut index = open_index(&dir);
            index.upsert("aa", 5, 1_000).unwrap();
            index
                .put_manifest("https://x/manifest.json", "{}", &["aa".to_string()], 1_000)
                .unwrap();
        }
        let index = open_index(&dir);
        assert_eq!(index.count().unwrap(), 1);
        assert_eq!(
            index.get_manifest("https://x/manifest.json").unwrap().as_deref(),
            Some("{}")
        );
        assert!(index.referenced_keys().unwrap().contains("aa"));
    }

    #[test]
    fn repinning_replaces_references() {
        let dir = TempDir::new().unwrap();
        let mut index = open_index(&dir);
        let url = "https://x/manifest.json";

        index
            .put_manifest(url, "v1", &["a".to_string(), "b".to_string()], 1)
            .unwrap();
        index.put_manifest(url, "v2", &["b".to_string()], 2).unwrap();
        index
            .put_manifest("https://y/manifest.json", "v1", &["c".to_string()], 3)
            .unwrap();

        let keys = index.referenced_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("b"));
        assert!(keys.contains("c"));
        assert_eq!(index.get_manifest(url).unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn remove_all_in_one_transaction() {
        let dir = TempDir::new().unwrap();
        let mut index = open_index(&dir);
        index.upsert("a", 1, 1).unwrap();
        index.upsert("b", 1, 2).unwrap();

        let removed = index
            .remove_all(&["a".to_string(), "b".to_string(), "c".to_string()])
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(index.count().unwrap(), 0);
        assert!(!index.remove("a").unwrap());
    }
}
