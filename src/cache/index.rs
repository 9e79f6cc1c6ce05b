//! Persisted index of cache entries
//!
//! The index is a single JSON object mapping cache keys to [`CacheEntry`]
//! records, stored as `cache_db.json` in the cache directory. All access goes
//! through [`LockedJsonFile`], so concurrent readers and writers (threads or
//! processes) never observe a torn write. A corrupt index is discarded and
//! treated as empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use super::{CacheError, PayloadStore};
use crate::persist::LockedJsonFile;

/// File name of the index inside the cache directory
pub const INDEX_FILE: &str = "cache_db.json";

type Entries = BTreeMap<String, CacheEntry>;

/// One row of the cache index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Normalized cache key
    pub key: String,
    /// Logical path the entry was saved for
    pub source_path: String,
    /// Payload unit holding the value
    pub storage_ref: String,
    /// When the value was fetched
    pub accessed_at: DateTime<Utc>,
    /// When the value stops being fresh
    pub expires_at: DateTime<Utc>,
    /// Element or byte count of the value, informational
    pub length: usize,
}

impl CacheEntry {
    /// An entry is fresh while `now < expires_at`
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Aggregate figures over the index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of index entries
    pub count: usize,
    /// Total size of payload units that still exist
    pub total_payload_bytes: u64,
}

impl CacheStats {
    /// Total payload size in megabytes, rounded to two decimals
    pub fn total_megabytes(&self) -> f64 {
        (self.total_payload_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone)]
pub struct CacheIndex {
    file: LockedJsonFile,
}

impl CacheIndex {
    /// Index stored in `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            file: LockedJsonFile::new(dir.join(INDEX_FILE)),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn io_error(&self, source: io::Error) -> CacheError {
        CacheError::Io {
            path: self.file.path().to_path_buf(),
            source,
        }
    }

    fn load(&self) -> Result<Entries, CacheError> {
        self.file
            .read_or_discard::<Entries>()
            .map(Option::unwrap_or_default)
            .map_err(|e| self.io_error(e))
    }

    fn update<R>(&self, f: impl FnOnce(&mut Entries) -> R) -> Result<R, CacheError> {
        self.file.update(f).map_err(|e| self.io_error(e))
    }

    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.load()?.remove(key))
    }

    /// Inserts or overwrites by `entry.key`, returning the replaced entry
    pub fn put(&self, entry: CacheEntry) -> Result<Option<CacheEntry>, CacheError> {
        self.update(|entries| entries.insert(entry.key.clone(), entry))
    }

    /// Removes the entry for `key`, returning it if one existed
    pub fn delete(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.update(|entries| entries.remove(key))
    }

    pub fn list_all(&self) -> Result<Vec<CacheEntry>, CacheError> {
        Ok(self.load()?.into_values().collect())
    }

    /// Removes every entry matching `predicate` under one exclusive lock
    ///
    /// Returns the removed entries and the number of entries left.
    pub fn remove_where(
        &self,
        mut predicate: impl FnMut(&CacheEntry) -> bool,
    ) -> Result<(Vec<CacheEntry>, usize), CacheError> {
        self.update(|entries| {
            let doomed: Vec<String> = entries
                .values()
                .filter(|entry| predicate(*entry))
                .map(|entry| entry.key.clone())
                .collect();
            let removed = doomed
                .iter()
                .filter_map(|key| entries.remove(key))
                .collect();
            (removed, entries.len())
        })
    }

    /// Empties the index, returning what it held
    pub fn clear(&self) -> Result<Vec<CacheEntry>, CacheError> {
        self.update(|entries| std::mem::take(entries).into_values().collect())
    }

    /// Counts entries and sums the sizes of their surviving payload units
    ///
    /// Entries whose unit vanished are skipped, not repaired.
    pub fn stats(&self, payloads: &PayloadStore) -> Result<CacheStats, CacheError> {
        let entries = self.load()?;
        let total_payload_bytes = entries
            .values()
            .filter_map(|entry| payloads.size_of(&entry.storage_ref))
            .sum();
        Ok(CacheStats {
            count: entries.len(),
            total_payload_bytes,
        })
    }
}
