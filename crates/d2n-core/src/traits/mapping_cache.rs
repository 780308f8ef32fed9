// # Mapping Cache Trait
//
// Defines the interface for the entity name → record handle cache.
//
// ## Purpose
//
// The cache lets the reconciler skip the remote search for entities it has
// resolved recently. It is trusted only within its TTL; the remote search is
// the source of truth whenever an entry is absent or expired.

use async_trait::async_trait;

use crate::model::RecordHandle;

/// Trait for mapping cache implementations
///
/// Mutations are write-through: an implementation with durable storage
/// persists on every `store`, `remove` and expiry purge. Persistence failures
/// are logged by the implementation and never surface to the caller; the
/// in-memory mapping stays authoritative for the rest of the process.
#[async_trait]
pub trait MappingCache: Send + Sync {
    /// Cached handle for `name`, if present and not older than the TTL
    ///
    /// An expired entry is purged as a side effect. Reading never refreshes
    /// an entry's timestamp.
    async fn lookup(&self, name: &str) -> Option<RecordHandle>;

    /// Insert or replace the entry for `name`, stamped with the current time
    async fn store(&self, name: &str, handle: &RecordHandle);

    /// Delete the entry for `name`; no-op if absent
    async fn remove(&self, name: &str);

    /// Persist the current mapping
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Successfully persisted (or nothing to persist)
    /// - `Err(Error)`: Storage error
    async fn flush(&self) -> Result<(), crate::Error>;
}
