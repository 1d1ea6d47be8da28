//! Key/value storage layers behind the cache manager
//!
//! `MemoryStore` keeps entries in a `HashMap`, `DiskStore` persists each entry
//! as a JSON file in an XDG-compliant cache directory, and `TieredStore`
//! layers the two: memory first, with an optional external layer behind it.
//!
//! Stores do no locking of their own. Reads take `&self` and mutations take
//! `&mut self`; the cache manager wraps its store in a `RwLock`.

use std::collections::HashMap;
use std::fs;
use std::marker::PhantomData;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::CacheEntry;

/// Errors raised by the cache and its storage layers
#[derive(Debug, Error)]
pub enum CacheError {
    /// TTL must be a positive number of seconds
    #[error("Invalid TTL: {0} (must be a positive number of seconds)")]
    InvalidTtl(u64),

    /// Reading or writing the backing store failed
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Value could not be encoded for the backing store
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A TTL-aware key/value layer
///
/// Stores keep expired entries until they are removed explicitly; expiry is
/// decided by the caller against its own clock.
pub trait ValueStore<V>: Send + Sync {
    /// Loads an entry regardless of expiry
    fn load(&self, key: &str) -> Result<Option<CacheEntry<V>>, CacheError>;

    /// Stores an entry, replacing any existing entry with the same key
    fn save(&mut self, entry: CacheEntry<V>) -> Result<(), CacheError>;

    /// Removes an entry, returning whether it existed
    fn remove(&mut self, key: &str) -> Result<bool, CacheError>;

    /// All entries currently held
    fn entries(&self) -> Result<Vec<CacheEntry<V>>, CacheError>;
}

/// In-memory layer
#[derive(Debug)]
pub struct MemoryStore<V> {
    entries: HashMap<String, CacheEntry<V>>,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone + Send + Sync> ValueStore<V> for MemoryStore<V> {
    fn load(&self, key: &str) -> Result<Option<CacheEntry<V>>, CacheError> {
        Ok(self.entries.get(key).cloned())
    }

    fn save(&mut self, entry: CacheEntry<V>) -> Result<(), CacheError> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn entries(&self) -> Result<Vec<CacheEntry<V>>, CacheError> {
        Ok(self.entries.values().cloned().collect())
    }
}

/// On-disk layer storing one JSON file per key
///
/// Stores entries in `~/.cache/pollencast/` on Linux (or the platform
/// equivalent). Files that cannot be read or parsed are treated as absent.
#[derive(Debug, Clone)]
pub struct DiskStore<V> {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
    _value: PhantomData<fn() -> V>,
}

impl<V> DiskStore<V> {
    /// Creates a DiskStore in the XDG cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "pollencast")?;
        Some(Self::with_dir(project_dirs.cache_dir().to_path_buf()))
    }

    /// Creates a DiskStore rooted at a custom directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            _value: PhantomData,
        }
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    /// Returns the path to a cache file for the given key
    ///
    /// Keys contain `:` separators, so anything outside `[A-Za-z0-9_-]` is
    /// hex-escaped as `%XX` to keep file names portable.
    fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", encode_key(key)))
    }

    /// Ensures the cache directory exists
    fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.cache_dir)
    }
}

impl<V> ValueStore<V> for DiskStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn load(&self, key: &str) -> Result<Option<CacheEntry<V>>, CacheError> {
        let content = match fs::read_to_string(self.cache_path(key)) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                debug!(key, error = %e, "ignoring unparseable cache file");
                Ok(None)
            }
        }
    }

    fn save(&mut self, entry: CacheEntry<V>) -> Result<(), CacheError> {
        self.ensure_dir()?;
        let json = serde_json::to_string_pretty(&entry)?;
        fs::write(self.cache_path(&entry.key), json)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, CacheError> {
        match fs::remove_file(self.cache_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn entries(&self) -> Result<Vec<CacheEntry<V>>, CacheError> {
        let dir = match fs::read_dir(&self.cache_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for file in dir {
            let path = file?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(entry) = serde_json::from_str::<CacheEntry<V>>(&content) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

/// Escapes a cache key into a portable file stem
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

/// Memory layer with an optional external layer behind it
///
/// Reads check memory first and fall through to the external layer without
/// promoting. Writes go to both layers; a failing external layer is logged
/// and does not fail the write.
pub struct TieredStore<V> {
    memory: MemoryStore<V>,
    external: Option<Box<dyn ValueStore<V>>>,
}

impl<V> TieredStore<V> {
    /// Memory-only store
    pub fn memory_only() -> Self {
        Self {
            memory: MemoryStore::new(),
            external: None,
        }
    }

    /// Memory store backed by an external layer
    pub fn with_external(external: Box<dyn ValueStore<V>>) -> Self {
        Self {
            memory: MemoryStore::new(),
            external: Some(external),
        }
    }
}

impl<V> std::fmt::Debug for TieredStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredStore")
            .field("memory_entries", &self.memory.len())
            .field("has_external", &self.external.is_some())
            .finish()
    }
}

impl<V: Clone + Send + Sync> ValueStore<V> for TieredStore<V> {
    fn load(&self, key: &str) -> Result<Option<CacheEntry<V>>, CacheError> {
        if let Some(entry) = self.memory.load(key)? {
            return Ok(Some(entry));
        }
        match &self.external {
            Some(external) => external.load(key),
            None => Ok(None),
        }
    }

    fn save(&mut self, entry: CacheEntry<V>) -> Result<(), CacheError> {
        if let Some(external) = self.external.as_mut() {
            if let Err(e) = external.save(entry.clone()) {
                warn!(key = %entry.key, error = %e, "external cache layer write failed");
            }
        }
        self.memory.save(entry)
    }

    fn remove(&mut self, key: &str) -> Result<bool, CacheError> {
        let mut removed = self.memory.remove(key)?;
        if let Some(external) = self.external.as_mut() {
            match external.remove(key) {
                Ok(existed) => removed |= existed,
                Err(e) => warn!(key, error = %e, "external cache layer remove failed"),
            }
        }
        Ok(removed)
    }

    fn entries(&self) -> Result<Vec<CacheEntry<V>>, CacheError> {
        let mut merged: HashMap<String, CacheEntry<V>> = HashMap::new();
        if let Some(external) = &self.external {
            match external.entries() {
                Ok(entries) => {
                    for entry in entries {
                        merged.insert(entry.key.clone(), entry);
                    }
                }
                Err(e) => warn!(error = %e, "external cache layer scan failed"),
            }
        }
        for entry in self.memory.entries()? {
            merged.insert(entry.key.clone(), entry);
        }
        Ok(merged.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestData {
        name: String,
        value: i32,
    }

    fn sample(key: &str, value: i32) -> CacheEntry<TestData> {
        CacheEntry::new(
            key,
            TestData {
                name: key.to_string(),
                value,
            },
            Utc::now(),
            60,
        )
    }

    fn create_disk_store() -> (DiskStore<TestData>, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = DiskStore::with_dir(temp_dir.path().to_path_buf());
        (store, temp_dir)
    }

    #[test]
    fn test_memory_store_save_load_remove() {
        let mut store = MemoryStore::new();
        store.save(sample("a", 1)).unwrap();

        assert_eq!(store.load("a").unwrap().unwrap().value.value, 1);
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(store.load("a").unwrap().is_none());
    }

    #[test]
    fn test_encode_key_escapes_separators() {
        assert_eq!(encode_key("weather:us:ny:nyc"), "weather%3Aus%3Any%3Anyc");
        assert_eq!(encode_key("plain_key-1"), "plain_key-1");
        assert_eq!(encode_key("../etc"), "%2E%2E%2Fetc");
    }

    #[test]
    fn test_disk_save_creates_file_in_cache_directory() {
        let (mut store, temp_dir) = create_disk_store();
        store.save(sample("weather:us:ny:nyc", 42)).expect("Write should succeed");

        let expected_path = temp_dir.path().join("weather%3Aus%3Any%3Anyc.json");
        assert!(expected_path.exists(), "Cache file should exist");

        let content = fs::read_to_string(&expected_path).expect("Should read file");
        assert!(content.contains("\"stored_at\""));
        assert!(content.contains("\"ttl_seconds\": 60"));
        assert!(content.contains("42"));
    }

    #[test]
    fn test_disk_load_returns_none_for_missing_key() {
        let (store, _temp_dir) = create_disk_store();
        assert!(store.load("nonexistent_key").unwrap().is_none());
    }

    #[test]
    fn test_disk_load_ignores_corrupt_file() {
        let (store, temp_dir) = create_disk_store();
        fs::write(temp_dir.path().join("broken.json"), "{ not json").unwrap();

        assert!(store.load("broken").unwrap().is_none());
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_disk_overwrite_existing_entry() {
        let (mut store, _temp_dir) = create_disk_store();
        store.save(sample("key", 1)).unwrap();
        store.save(sample("key", 2)).unwrap();

        assert_eq!(store.load("key").unwrap().unwrap().value.value, 2);
        assert_eq!(store.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_disk_save_creates_directory_if_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested_path = temp_dir.path().join("nested").join("cache");
        let mut store: DiskStore<TestData> = DiskStore::with_dir(nested_path.clone());

        store.save(sample("nested_key", 1)).expect("Write should succeed");

        assert!(nested_path.join("nested_key.json").exists());
    }

    #[test]
    fn test_disk_entries_on_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store: DiskStore<TestData> = DiskStore::with_dir(temp_dir.path().join("absent"));
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_new_creates_xdg_compliant_path() {
        if let Some(store) = DiskStore::<TestData>::new() {
            let path_str = store.cache_dir().to_string_lossy();
            assert!(path_str.contains("pollencast"));
        }
        // Passes if new() returns None (e.g., no home directory in CI)
    }

    #[test]
    fn test_tiered_reads_fall_through_to_external() {
        let (mut disk, _temp_dir) = create_disk_store();
        disk.save(sample("persisted", 7)).unwrap();

        let store = TieredStore::with_external(Box::new(disk));
        let entry = store.load("persisted").unwrap().expect("external hit");
        assert_eq!(entry.value.value, 7);
        // no promotion on read
        assert!(store.memory.is_empty());
    }

    #[test]
    fn test_tiered_writes_through_and_removes_both() {
        let temp_dir = TempDir::new().unwrap();
        let disk: DiskStore<TestData> = DiskStore::with_dir(temp_dir.path().to_path_buf());
        let mut store = TieredStore::with_external(Box::new(disk.clone()));

        store.save(sample("k", 3)).unwrap();
        assert!(disk.load("k").unwrap().is_some());

        assert!(store.remove("k").unwrap());
        assert!(disk.load("k").unwrap().is_none());
        assert!(store.load("k").unwrap().is_none());
    }

    #[test]
    fn test_tiered_entries_prefers_memory_copy() {
        let temp_dir = TempDir::new().unwrap();
        let mut disk: DiskStore<TestData> = DiskStore::with_dir(temp_dir.path().to_path_buf());
        disk.save(sample("shared", 1)).unwrap();
        disk.save(sample("disk_only", 9)).unwrap();

        let mut store = TieredStore::with_external(Box::new(disk));
        store.memory.save(sample("shared", 2)).unwrap();

        let mut entries = store.entries().unwrap();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "disk_only");
        assert_eq!(entries[1].value.value, 2);
    }
}
