// # File Mapping Cache
//
// File-based implementation of MappingCache.
//
// ## Purpose
//
// Keeps name → record handle mappings across daemon restarts so a restart
// within the TTL window does not search (or worse, re-create) records the
// previous process had already resolved.
//
// ## Durability
//
// - Write-through: every store, remove and expiry purge rewrites the file
// - Atomic writes: new content goes to a temporary file, then is renamed
// - Corruption: an unreadable or malformed file loads as an empty cache
// - Write failures are logged; the in-memory mapping stays authoritative
//
// ## File Format
//
// ```json
// {
//   "web": {
//     "handle": "1f2e3d4c-...",
//     "timestamp": 1736424000.25
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::clock::{Clock, SystemClock};
use super::CacheEntry;
use crate::Error;
use crate::model::RecordHandle;
use crate::traits::MappingCache;

/// File-backed mapping cache with TTL expiry
///
/// # Example
///
/// ```rust,no_run
/// use d2n_core::cache::FileMappingCache;
/// use d2n_core::model::RecordHandle;
/// use d2n_core::traits::MappingCache;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let cache = FileMappingCache::open("data/cache.json", Duration::from_secs(300)).await;
///
///     cache.store("web", &RecordHandle::new("page-1")).await;
///     assert_eq!(cache.lookup("web").await, Some(RecordHandle::new("page-1")));
/// }
/// ```
pub struct FileMappingCache {
    path: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl std::fmt::Debug for FileMappingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMappingCache")
            .field("path", &self.path)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl FileMappingCache {
    /// Load the cache at `path` using wall-clock time
    ///
    /// Never fails: a missing file starts empty, a corrupt or unreadable one
    /// is reported and also starts empty.
    pub async fn open(path: impl AsRef<Path>, ttl: Duration) -> Self {
        Self::open_with_clock(path, ttl, Arc::new(SystemClock)).await
    }

    /// Load the cache at `path` with an explicit time source
    pub async fn open_with_clock(
        path: impl AsRef<Path>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = Self::load(&path).await;

        tracing::info!(
            "Mapping cache ready: {} ({} entries, TTL {}s)",
            path.display(),
            entries.len(),
            ttl.as_secs()
        );

        Self {
            path,
            ttl,
            clock,
            entries: RwLock::new(entries),
        }
    }

    /// Read entries from disk, treating any failure as an empty cache
    async fn load(path: &Path) -> HashMap<String, CacheEntry> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    "Cache file {} does not exist. Starting with empty cache.",
                    path.display()
                );
                return HashMap::new();
            }
            Err(e) => {
                tracing::error!(
                    "Failed to read cache file {}: {}. Starting with empty cache.",
                    path.display(),
                    e
                );
                return HashMap::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(
                    "Cache file {} contains invalid JSON: {}. Starting with empty cache.",
                    path.display(),
                    e
                );
                HashMap::new()
            }
        }
    }

    /// Write entries to disk atomically
    async fn persist(&self, entries: &HashMap<String, CacheEntry>) -> Result<(), Error> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::cache(format!(
                    "Failed to create cache directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| Error::cache(format!("Failed to serialize cache: {e}")))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::cache(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::cache(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::cache(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::cache(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Cache written to file: {}", self.path.display());
        Ok(())
    }

    /// Persist and log on failure; the in-memory mapping is kept either way
    async fn persist_or_report(&self, entries: &HashMap<String, CacheEntry>) {
        if let Err(e) = self.persist(entries).await {
            tracing::error!("{}. Continuing with in-memory cache.", e);
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Number of entries currently held, expired or not
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl MappingCache for FileMappingCache {
    async fn lookup(&self, name: &str) -> Option<RecordHandle> {
        let mut entries = self.entries.write().await;
        let now = self.clock.now();

        let entry = entries.get(name)?;
        if !entry.is_expired(now, self.ttl) {
            return Some(entry.handle.clone());
        }

        tracing::debug!("Cache entry for {} has expired. Removing from cache.", name);
        entries.remove(name);
        self.persist_or_report(&entries).await;
        None
    }

    async fn store(&self, name: &str, handle: &RecordHandle) {
        let mut entries = self.entries.write().await;
        tracing::debug!("Caching handle {} for {}", handle, name);
        entries.insert(
            name.to_string(),
            CacheEntry::new(handle.clone(), self.clock.now()),
        );
        self.persist_or_report(&entries).await;
    }

    async fn remove(&self, name: &str) {
        let mut entries = self.entries.write().await;
        if entries.remove(name).is_some() {
            tracing::debug!("Removed cache entry for {}", name);
            self.persist_or_report(&entries).await;
        }
    }

    async fn flush(&self) -> Result<(), Error> {
        let entries = self.entries.read().await;
        self.persist(&entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use chrono::DateTime;
    use tempfile::tempdir;

    const TTL: Duration = Duration::from_secs(300);

    fn start_clock() -> ManualClock {
        ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap())
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = FileMappingCache::open(&path, TTL).await;
        assert!(cache.is_empty().await);

        let handle = RecordHandle::new("page-1");
        cache.store("web", &handle).await;

        assert_eq!(cache.lookup("web").await, Some(handle));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = FileMappingCache::open(&path, TTL).await;
        cache.store("web", &RecordHandle::new("page-1")).await;
        cache.store("db", &RecordHandle::new("page-2")).await;
        drop(cache);

        let reopened = FileMappingCache::open(&path, TTL).await;
        assert_eq!(reopened.len().await, 2);
        assert_eq!(
            reopened.lookup("db").await,
            Some(RecordHandle::new("page-2"))
        );
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let clock = start_clock();

        let cache = FileMappingCache::open_with_clock(&path, TTL, Arc::new(clock.clone())).await;
        cache.store("web", &RecordHandle::new("page-1")).await;

        clock.advance(TTL - Duration::from_millis(1));
        assert_eq!(cache.lookup("web").await, Some(RecordHandle::new("page-1")));

        clock.advance(Duration::from_millis(2));
        assert_eq!(cache.lookup("web").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_expiry_purge_is_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let clock = start_clock();

        let cache = FileMappingCache::open_with_clock(&path, TTL, Arc::new(clock.clone())).await;
        cache.store("web", &RecordHandle::new("page-1")).await;
        cache.store("db", &RecordHandle::new("page-2")).await;

        clock.advance(TTL + Duration::from_secs(1));
        assert_eq!(cache.lookup("web").await, None);

        let on_disk: HashMap<String, CacheEntry> =
            serde_json::from_str(&fs::read_to_string(&path).await.unwrap()).unwrap();
        assert!(!on_disk.contains_key("web"));
        assert!(on_disk.contains_key("db"));
    }

    #[tokio::test]
    async fn test_lookup_does_not_refresh_ttl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let clock = start_clock();

        let cache = FileMappingCache::open_with_clock(&path, TTL, Arc::new(clock.clone())).await;
        cache.store("web", &RecordHandle::new("page-1")).await;

        clock.advance(Duration::from_secs(200));
        assert!(cache.lookup("web").await.is_some());

        clock.advance(Duration::from_secs(200));
        assert_eq!(cache.lookup("web").await, None);
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = FileMappingCache::open(&path, TTL).await;
        cache.remove("ghost").await;
        assert!(!path.exists());

        cache.store("web", &RecordHandle::new("page-1")).await;
        cache.remove("web").await;
        cache.remove("web").await;
        assert_eq!(cache.lookup("web").await, None);
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, b"{ not json").await.unwrap();

        let cache = FileMappingCache::open(&path, TTL).await;
        assert!(cache.is_empty().await);

        // The next write replaces the corrupt content
        cache.store("web", &RecordHandle::new("page-1")).await;
        let reopened = FileMappingCache::open(&path, TTL).await;
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("data").join("cache.json");

        let cache = FileMappingCache::open(&path, TTL).await;
        cache.store("web", &RecordHandle::new("page-1")).await;

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_write_failure_keeps_memory_authoritative() {
        let dir = tempdir().unwrap();
        // A directory where the cache file should be makes every write fail
        let path = dir.path().join("cache.json");
        fs::create_dir(&path).await.unwrap();

        let cache = FileMappingCache::open(&path, TTL).await;
        cache.store("web", &RecordHandle::new("page-1")).await;

        assert_eq!(cache.lookup("web").await, Some(RecordHandle::new("page-1")));
        assert!(cache.flush().await.is_err());
    }
}
