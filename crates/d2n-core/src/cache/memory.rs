// # Memory Mapping Cache
//
// In-memory implementation of MappingCache.
//
// ## Crash Behavior
//
// - All mappings are lost on restart
// - The first reconciliation of each container after a restart goes through
//   the remote search, which finds the existing record (no duplicates, just
//   one extra query per container)

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::clock::{Clock, SystemClock};
use super::CacheEntry;
use crate::Error;
use crate::model::RecordHandle;
use crate::traits::MappingCache;

/// In-memory mapping cache with TTL expiry
#[derive(Clone)]
pub struct MemoryMappingCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryMappingCache {
    /// Create an empty cache using wall-clock time
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Create an empty cache with an explicit time source
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the number of entries in the cache
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Whether an entry exists for `name`, ignoring expiry
    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.contains_key(name)
    }
}

impl Default for MemoryMappingCache {
    fn default() -> Self {
        Self::new(super::DEFAULT_TTL)
    }
}

#[async_trait]
impl MappingCache for MemoryMappingCache {
    async fn lookup(&self, name: &str) -> Option<RecordHandle> {
        let mut guard = self.inner.write().await;
        let entry = guard.get(name)?;
        if !entry.is_expired(self.clock.now(), self.ttl) {
            return Some(entry.handle.clone());
        }

        tracing::debug!("Cache entry for {} has expired. Removing from cache.", name);
        guard.remove(name);
        None
    }

    async fn store(&self, name: &str, handle: &RecordHandle) {
        let mut guard = self.inner.write().await;
        guard.insert(
            name.to_string(),
            CacheEntry::new(handle.clone(), self.clock.now()),
        );
    }

    async fn remove(&self, name: &str) {
        let mut guard = self.inner.write().await;
        guard.remove(name);
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing to persist
        Ok(())
    }
}
