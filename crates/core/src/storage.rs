//! Byte storage for uploaded documents.

use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tempfile::NamedTempFile;

/// Where document bytes live.
///
/// Writes must be atomic: a reader sees either the previous bytes or the new
/// bytes, never a mix.
pub trait Storage: Send + Sync {
    fn read_bytes(&self, key: &str) -> io::Result<Vec<u8>>;

    fn write_bytes(&self, key: &str, bytes: &[u8]) -> io::Result<()>;

    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> io::Result<()>;
}

/// Reject keys that are empty or could address anything outside one flat
/// directory.
pub fn validate_key(key: &str) -> CoreResult<()> {
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(['/', '\\', '\0'])
        || key.starts_with('.');
    if bad {
        return Err(CoreError::InvalidStorageKey(key.to_string()));
    }
    Ok(())
}

/// Build a fresh storage key that keeps the original extension.
#[must_use]
pub fn new_key(original_name: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    match Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
    {
        Some(ext) => format!("{id}.{}", ext.to_ascii_lowercase()),
        None => id,
    }
}

fn invalid_key(key: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        CoreError::InvalidStorageKey(key.to_string()).to_string(),
    )
}

/// Files in a single directory; writes go through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Open (and create if needed) a storage directory.
    pub fn open(root: impl Into<PathBuf>) -> CoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        validate_key(key).map_err(|_| invalid_key(key))?;
        Ok(self.root.join(key))
    }
}

impl Storage for FsStorage {
    fn read_bytes(&self, key: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(key)?)
    }

    fn write_bytes(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_for(key)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        tracing::debug!(key, bytes = bytes.len(), "stored document bytes");
        Ok(())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// In-process storage, mainly for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn read_bytes(&self, key: &str) -> io::Result<Vec<u8>> {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such key: {key}")))
    }

    fn write_bytes(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        validate_key(key).map_err(|_| invalid_key(key))?;
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}
