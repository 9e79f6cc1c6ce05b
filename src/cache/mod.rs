//! Cache module for storing web service responses to disk
//!
//! This module provides a cache manager that persists responses to the
//! filesystem with a TTL chosen by the caller. The on-disk layout is one
//! index file plus one payload file per entry; the index is guarded by
//! advisory file locks so several threads or processes can share a cache
//! directory. Expired entries are still returned, flagged as stale.

mod index;
mod manager;
mod payload;

use std::path::PathBuf;
use thiserror::Error;

pub use index::{CacheEntry, CacheIndex, CacheStats, INDEX_FILE};
pub use manager::{CacheHit, CacheManager, CleanupReport, ClearReport, Freshness};
pub use payload::{Payload, PayloadRead, PayloadStore, PAYLOAD_EXT};

/// Errors that can occur when reading or writing the cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// The value has no representation in the payload format
    #[error("Cannot serialize payload: {0}")]
    Serialization(String),

    /// An index entry names a payload unit outside the cache directory
    #[error("Invalid storage reference: {0}")]
    InvalidStorageRef(String),

    /// Filesystem access failed
    #[error("Cache I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
