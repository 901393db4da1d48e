//! Coordinate association store
//!
//! The `respawnBlock` rule only injects a call to a host-side bridge; that
//! bridge remembers which structure stood at a block coordinate before it was
//! destroyed. [`CoordinateStore`] is the narrow interface behind it, with an
//! in-memory and a JSON-file implementation.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Block position in a named world
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoordinateKey {
    pub world: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CoordinateKey {
    /// Create key
    #[must_use]
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }
}

/// `world:x,y,z`
impl fmt::Display for CoordinateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{},{}", self.world, self.x, self.y, self.z)
    }
}

impl FromStr for CoordinateKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || StoreError::BadKey(s.to_owned());
        let (world, position) = s.rsplit_once(':').ok_or_else(bad)?;
        if world.is_empty() {
            return Err(bad());
        }
        let mut parts = position.split(',').map(|p| p.trim().parse::<i32>());
        let mut next = || -> Result<i32, StoreError> {
            parts.next().ok_or_else(bad)?.map_err(|_| bad())
        };
        let key = Self::new(world, next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(key)
    }
}

/// Store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Key text is not `world:x,y,z`
    #[error("invalid coordinate key: {0}")]
    BadKey(String),

    /// IO error on the backing file
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backing file is not a JSON object of strings
    #[error("invalid store file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Coordinate → structure id association
pub trait CoordinateStore: Send + Sync + fmt::Debug {
    /// Structure id remembered at `key`
    fn get(&self, key: &CoordinateKey) -> Option<String>;

    /// Remember `value` at `key`, replacing any previous value
    ///
    /// # Errors
    /// Persistent implementations fail when the write cannot be stored.
    fn put(&self, key: &CoordinateKey, value: &str) -> Result<(), StoreError>;

    /// Forget `key`; returns the value it held
    ///
    /// # Errors
    /// Persistent implementations fail when the write cannot be stored.
    fn delete(&self, key: &CoordinateKey) -> Result<Option<String>, StoreError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryCoordinateStore {
    entries: DashMap<CoordinateKey, String>,
}

impl MemoryCoordinateStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CoordinateStore for MemoryCoordinateStore {
    fn get(&self, key: &CoordinateKey) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn put(&self, key: &CoordinateKey, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.clone(), value.to_owned());
        Ok(())
    }

    fn delete(&self, key: &CoordinateKey) -> Result<Option<String>, StoreError> {
        Ok(self.entries.remove(key).map(|(_, v)| v))
    }
}

/// Store persisted as one JSON object (`"world:x,y,z": "structure"`)
///
/// Every write rewrites the file through a temporary sibling and a rename;
/// the in-memory view only changes once that succeeds.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`; a missing file is an empty store
    ///
    /// # Errors
    /// Fails when the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Backing file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of all entries, ordered by key text
    #[must_use]
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(entries).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(io)?;
        std::fs::rename(&tmp, &self.path).map_err(io)
    }
}

impl CoordinateStore for JsonFileStore {
    fn get(&self, key: &CoordinateKey) -> Option<String> {
        self.entries.lock().get(&key.to_string()).cloned()
    }

    fn put(&self, key: &CoordinateKey, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_owned());
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }

    fn delete(&self, key: &CoordinateKey) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock();
        let key = key.to_string();
        if !entries.contains_key(&key) {
            return Ok(None);
        }
        let mut next = entries.clone();
        let removed = next.remove(&key);
        self.flush(&next)?;
        *entries = next;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn key() -> CoordinateKey {
        CoordinateKey::new("default", 10, -64, 3)
    }

    #[test]
    fn key_text_round_trip() {
        let key = key();
        assert_eq!(key.to_string(), "default:10,-64,3");
        assert_eq!("default:10,-64,3".parse::<CoordinateKey>().unwrap(), key);
        assert_eq!(
            "instance:lobby:1, 2, 3".parse::<CoordinateKey>().unwrap(),
            CoordinateKey::new("instance:lobby", 1, 2, 3)
        );
    }

    #[test]
    fn malformed_keys_rejected() {
        for text in ["", "world", ":1,2,3", "w:1,2", "w:1,2,3,4", "w:a,b,c"] {
            assert!(text.parse::<CoordinateKey>().is_err(), "{text}");
        }
    }

    #[test]
    fn memory_store_crud() {
        let store = MemoryCoordinateStore::new();
        assert_eq!(store.get(&key()), None);
        store.put(&key(), "bed:respawn-anchor").unwrap();
        assert_eq!(store.get(&key()).as_deref(), Some("bed:respawn-anchor"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.delete(&key()).unwrap().as_deref(), Some("bed:respawn-anchor"));
        assert!(store.is_empty());
    }

    #[test]
    fn memory_store_concurrent_writers() {
        let store = Arc::new(MemoryCoordinateStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store
                            .put(&CoordinateKey::new("w", t, i, 0), "bed")
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 400);
    }

    #[test]
    fn file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("structures.json");

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get(&key()), None);
        store.put(&key(), "bed").unwrap();
        store
            .put(&CoordinateKey::new("default", 0, 0, 0), "anchor")
            .unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get(&key()).as_deref(), Some("bed"));
        assert_eq!(reopened.entries().len(), 2);
        assert_eq!(reopened.delete(&key()).unwrap().as_deref(), Some("bed"));
        assert_eq!(reopened.delete(&key()).unwrap(), None);

        let again = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            again.entries(),
            vec![("default:0,0,0".to_owned(), "anchor".to_owned())]
        );
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("data");
        std::fs::create_dir(&parent).unwrap();
        let store = JsonFileStore::open(parent.join("structures.json")).unwrap();
        let kept = CoordinateKey::new("default", 0, 0, 0);
        store.put(&kept, "anchor").unwrap();

        // a file where the parent directory was makes every write fail
        std::fs::remove_dir_all(&parent).unwrap();
        std::fs::write(&parent, b"").unwrap();

        assert!(matches!(store.put(&key(), "bed"), Err(StoreError::Io { .. })));
        assert_eq!(store.get(&key()), None);
        assert!(store.delete(&kept).is_err());
        assert_eq!(store.get(&kept).as_deref(), Some("anchor"));

        std::fs::remove_file(&parent).unwrap();
        std::fs::create_dir(&parent).unwrap();
        store.put(&CoordinateKey::new("default", 1, 1, 1), "later").unwrap();

        let reopened = JsonFileStore::open(parent.join("structures.json")).unwrap();
        assert_eq!(
            reopened.entries(),
            vec![
                ("default:0,0,0".to_owned(), "anchor".to_owned()),
                ("default:1,1,1".to_owned(), "later".to_owned()),
            ]
        );
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("structures.json");
        std::fs::write(&path, b"[1, 2]").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Json { .. })
        ));
    }
}
