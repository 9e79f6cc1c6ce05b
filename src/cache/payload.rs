//! Per-entry payload storage
//!
//! Each cached value lives in its own `<REF>.json` file, where `REF` is a
//! short random identifier handed out by [`PayloadStore::allocate`].

use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::CacheError;
use crate::persist::{remove_if_exists, write_atomic};

/// File extension of payload units
pub const PAYLOAD_EXT: &str = "json";

/// Length of a storage reference in hex characters
const STORAGE_REF_LEN: usize = 15;

/// A value fetched from the web service
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Successful response without a body
    Empty,
    /// Structured JSON body
    Json(Value),
    /// Opaque body such as an image, tagged with its content type
    Binary { content_type: String, bytes: Vec<u8> },
}

impl Payload {
    /// Element count for JSON containers and strings, byte count for binary
    pub fn len(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::Json(Value::Array(items)) => items.len(),
            Payload::Json(Value::Object(fields)) => fields.len(),
            Payload::Json(Value::String(s)) => s.len(),
            Payload::Json(Value::Null) => 0,
            Payload::Json(_) => 1,
            Payload::Binary { bytes, .. } => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content type of a binary payload
    pub fn content_type(&self) -> Option<&str> {
        match self {
            Payload::Binary { content_type, .. } => Some(content_type),
            _ => None,
        }
    }

    /// JSON rendering for display; binary content is summarised, not embedded
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Empty => Value::Null,
            Payload::Json(value) => value.clone(),
            Payload::Binary {
                content_type,
                bytes,
            } => serde_json::json!({
                "content_type": content_type,
                "length": bytes.len(),
            }),
        }
    }
}

/// Result of reading a payload unit
#[derive(Debug)]
pub enum PayloadRead {
    Found(Payload),
    /// The unit does not exist
    Missing,
    /// The unit exists but cannot be deserialized; the owning entry should go
    Corrupt,
}

/// Stores one file per cache entry in the cache directory
#[derive(Debug, Clone)]
pub struct PayloadStore {
    dir: PathBuf,
}

impl PayloadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the unit behind `storage_ref`
    pub fn path_of(&self, storage_ref: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", storage_ref, PAYLOAD_EXT))
    }

    /// Hands out a storage reference that no existing unit uses
    pub fn allocate(&self) -> String {
        self.allocate_from(new_storage_ref)
    }

    fn allocate_from(&self, mut next: impl FnMut() -> String) -> String {
        loop {
            let candidate = next();
            if !self.path_of(&candidate).exists() {
                return candidate;
            }
            debug!(storage_ref = %candidate, "storage reference collision, retrying");
        }
    }

    /// Serializes `value` into the unit behind `storage_ref`
    ///
    /// Binary payloads are rejected with [`CacheError::Serialization`]; the
    /// caller is expected to skip caching in that case. A reference that is
    /// not one [`allocate`](Self::allocate) could have produced is rejected
    /// with [`CacheError::InvalidStorageRef`] before anything is written.
    pub fn write(&self, storage_ref: &str, value: &Payload) -> Result<u64, CacheError> {
        if !is_storage_ref(storage_ref) {
            return Err(CacheError::InvalidStorageRef(storage_ref.to_string()));
        }
        let bytes = match value {
            Payload::Empty => b"null".to_vec(),
            Payload::Json(json) => serde_json::to_vec(json)
                .map_err(|e| CacheError::Serialization(e.to_string()))?,
            Payload::Binary { content_type, .. } => {
                return Err(CacheError::Serialization(format!(
                    "{} content cannot be stored as JSON",
                    content_type
                )))
            }
        };

        let path = self.path_of(storage_ref);
        write_atomic(&path, &bytes).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(bytes.len() as u64)
    }

    /// Reads the unit behind `storage_ref`
    pub fn read(&self, storage_ref: &str) -> PayloadRead {
        if !is_storage_ref(storage_ref) {
            warn!(storage_ref, "index entry carries an invalid storage reference");
            return PayloadRead::Corrupt;
        }

        let path = self.path_of(storage_ref);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return PayloadRead::Missing,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot read payload");
                return PayloadRead::Missing;
            }
        };

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Null) => PayloadRead::Found(Payload::Empty),
            Ok(value) => PayloadRead::Found(Payload::Json(value)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "payload is not valid JSON");
                PayloadRead::Corrupt
            }
        }
    }

    /// Best-effort delete; returns whether a unit was removed
    pub fn remove(&self, storage_ref: &str) -> bool {
        if !is_storage_ref(storage_ref) {
            return false;
        }
        let path = self.path_of(storage_ref);
        match remove_if_exists(&path) {
            Ok(removed) => removed,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot remove payload");
                false
            }
        }
    }

    /// Size in bytes of an existing unit
    pub fn size_of(&self, storage_ref: &str) -> Option<u64> {
        if !is_storage_ref(storage_ref) {
            return None;
        }
        fs::metadata(self.path_of(storage_ref))
            .ok()
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
    }

    /// Storage references of every unit currently in the directory
    pub fn list_refs(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension()? != PAYLOAD_EXT {
                    return None;
                }
                let stem = path.file_stem()?.to_str()?;
                is_storage_ref(stem).then(|| stem.to_string())
            })
            .collect()
    }
}

fn new_storage_ref() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(STORAGE_REF_LEN);
    id.to_uppercase()
}

/// Storage references are exactly 15 upper-case hex characters
pub(super) fn is_storage_ref(s: &str) -> bool {
    s.len() == STORAGE_REF_LEN
        && s
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
}
