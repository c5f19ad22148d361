//! Key/value storage backends for credentials
//!
//! The token store writes every credential to two backends: a durable one
//! that survives restarts and is shared by every context of the same user,
//! and a session-scoped one private to a single context.

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Lifetime of a storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Survives restarts, shared between contexts
    Durable,
    /// Lives as long as one context
    Session,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Durable => write!(f, "durable"),
            StorageKind::Session => write!(f, "session"),
        }
    }
}

/// Storage access errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt storage file: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A string key/value medium in the style of web storage
pub trait KeyValueStorage: Send + Sync + fmt::Debug {
    fn kind(&self) -> StorageKind;

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process storage
#[derive(Debug)]
pub struct MemoryStorage {
    kind: StorageKind,
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Session-scoped storage for a single context
    pub fn session() -> Self {
        Self {
            kind: StorageKind::Session,
            items: RwLock::new(HashMap::new()),
        }
    }

    /// In-memory stand-in for a durable medium (tests, ephemeral processes)
    pub fn durable() -> Self {
        Self {
            kind: StorageKind::Durable,
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn kind(&self) -> StorageKind {
        self.kind
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.write().remove(key);
        Ok(())
    }
}

/// Durable storage backed by a JSON object file
///
/// The file is read once, on first access, and kept in memory afterwards.
/// Reads are served from memory; writes update memory and are written
/// through to disk. Writes go to a sibling temp file which is then renamed
/// over the target, so a crash mid-write never leaves a truncated file behind.
///
/// Changes made to the file by another process after the first read are not
/// observed by this instance.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    cache: Mutex<Option<Map<String, Value>>>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// The in-memory map, loading it from disk the first time
    fn loaded<'a>(
        &self,
        cache: &'a mut Option<Map<String, Value>>,
    ) -> Result<&'a mut Map<String, Value>, StorageError> {
        if cache.is_none() {
            *cache = Some(self.read_map()?);
        }
        Ok(cache.get_or_insert_with(Map::new))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, Value>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = open_private(&tmp_path)?;
            file.write_all(serde_json::to_string_pretty(map)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}

impl KeyValueStorage for FileStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Durable
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut cache = self.cache.lock();
        let map = self.loaded(&mut cache)?;
        Ok(map.get(key).and_then(|v| v.as_str()).map(str::to_owned))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut cache = self.cache.lock();
        let map = self.loaded(&mut cache)?;
        if map.get(key).and_then(Value::as_str) == Some(value) {
            return Ok(());
        }
        let mut next = map.clone();
        next.insert(key.to_string(), Value::String(value.to_string()));
        self.write_map(&next)?;
        *map = next;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut cache = self.cache.lock();
        let map = self.loaded(&mut cache)?;
        if !map.contains_key(key) {
            return Ok(());
        }
        let mut next = map.clone();
        next.remove(key);
        self.write_map(&next)?;
        *map = next;
        Ok(())
    }
}
