//! Lock-guarded JSON files shared between threads and processes
//!
//! Every read of a [`LockedJsonFile`] holds a shared advisory lock for the
//! duration of deserialization and every write holds an exclusive one for the
//! duration of serialization. The lock lives in a sibling `.lock` file because
//! writes replace the data file by renaming a temp file over it, so readers
//! always see either the previous or the new content.

use fs2::FileExt;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Outcome of reading a persisted JSON file
#[derive(Debug)]
pub enum Loaded<T> {
    /// No file on disk
    Missing,
    /// File parsed successfully
    Parsed(T),
    /// File exists but is not a valid serialization
    Corrupt(serde_json::Error),
}

/// A JSON document on disk guarded by shared/exclusive advisory locks
///
/// Every operation blocks the calling thread until its lock is granted;
/// async callers run them on the blocking pool.
#[derive(Debug, Clone)]
pub struct LockedJsonFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl LockedJsonFile {
    /// Creates a handle for the JSON file at `path`
    ///
    /// Nothing touches the filesystem until the first read or write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    /// Path of the data file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_lock(&self) -> io::Result<File> {
        if let Some(parent) = parent_dir(&self.lock_path) {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
    }

    fn lock_shared(&self) -> io::Result<File> {
        let file = self.open_lock()?;
        file.lock_shared()?;
        Ok(file)
    }

    fn lock_exclusive(&self) -> io::Result<File> {
        let file = self.open_lock()?;
        file.lock_exclusive()?;
        Ok(file)
    }

    /// Parses the data file; the caller must hold a lock
    fn parse<T: DeserializeOwned>(&self) -> io::Result<Loaded<T>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(match serde_json::from_slice(&bytes) {
                Ok(value) => Loaded::Parsed(value),
                Err(err) => Loaded::Corrupt(err),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Loaded::Missing),
            Err(err) => Err(err),
        }
    }

    /// Reads the file under a shared lock
    pub fn read<T: DeserializeOwned>(&self) -> io::Result<Loaded<T>> {
        let _guard = self.lock_shared()?;
        self.parse()
    }

    /// Reads the file, deleting it if it turns out to be corrupt
    ///
    /// Returns `None` for both a missing and a discarded file.
    pub fn read_or_discard<T: DeserializeOwned>(&self) -> io::Result<Option<T>> {
        match self.read()? {
            Loaded::Parsed(value) => Ok(Some(value)),
            Loaded::Missing => Ok(None),
            Loaded::Corrupt(err) => {
                warn!(path = %self.path.display(), error = %err, "discarding corrupt file");
                self.discard_corrupt::<T>()?;
                Ok(None)
            }
        }
    }

    fn discard_corrupt<T: DeserializeOwned>(&self) -> io::Result<()> {
        let _guard = self.lock_exclusive()?;
        // A writer may have replaced the file between the shared read and now.
        if let Loaded::Corrupt(_) = self.parse::<T>()? {
            remove_if_exists(&self.path)?;
        }
        Ok(())
    }

    /// Read-modify-write under a single exclusive lock
    ///
    /// A missing or corrupt file starts from `T::default()`; the corrupt
    /// content is overwritten by the write that follows.
    pub fn update<T, R>(&self, f: impl FnOnce(&mut T) -> R) -> io::Result<R>
    where
        T: Default + Serialize + DeserializeOwned,
    {
        let _guard = self.lock_exclusive()?;
        let mut value = match self.parse()? {
            Loaded::Parsed(value) => value,
            Loaded::Missing => T::default(),
            Loaded::Corrupt(err) => {
                warn!(path = %self.path.display(), error = %err, "resetting corrupt file");
                T::default()
            }
        };
        let out = f(&mut value);
        self.write_unlocked(&value)?;
        Ok(out)
    }

    /// Replaces the file content under an exclusive lock
    pub fn write<T: Serialize>(&self, value: &T) -> io::Result<()> {
        let _guard = self.lock_exclusive()?;
        self.write_unlocked(value)
    }

    /// Deletes the data file under an exclusive lock
    ///
    /// Returns whether a file was removed.
    pub fn remove(&self) -> io::Result<bool> {
        let _guard = self.lock_exclusive()?;
        remove_if_exists(&self.path)
    }

    fn write_unlocked<T: Serialize>(&self, value: &T) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_atomic(&self.path, &bytes)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "wrote file");
        Ok(())
    }
}

/// Writes `bytes` to a temp file next to `path` and renames it into place
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = parent_dir(path).unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Removes a file, treating absence as success
///
/// Returns whether a file was removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}
