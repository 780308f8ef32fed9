// # Record Store Trait
//
// Defines the interface for writing container records to a remote service.
//
// ## Implementations
//
// - Notion databases: `d2n-notion` crate

use async_trait::async_trait;

use crate::model::{EntitySnapshot, RecordHandle};

/// Trait for remote record store implementations
///
/// Every method is a single remote call. Implementations log their own
/// failures and return them as [`crate::Error`] values; they never retry.
/// Retry policy lives entirely in the `Reconciler`.
///
/// A bucket is the opaque identifier of a destination partition (for Notion,
/// a database id).
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Find the record for an entity name inside a bucket
    ///
    /// # Returns
    ///
    /// - `Ok(Some(handle))`: First exact-name match
    /// - `Ok(None)`: The query succeeded and matched nothing
    /// - `Err(Error)`: The query failed (transport, authentication, ...)
    async fn find(&self, bucket: &str, name: &str) -> Result<Option<RecordHandle>, crate::Error>;

    /// Create a record for the snapshot inside a bucket
    async fn create(
        &self,
        bucket: &str,
        snapshot: &EntitySnapshot,
    ) -> Result<RecordHandle, crate::Error>;

    /// Overwrite an existing record with the snapshot's fields
    async fn update(
        &self,
        handle: &RecordHandle,
        snapshot: &EntitySnapshot,
    ) -> Result<(), crate::Error>;

    /// Store name for logging
    fn store_name(&self) -> &'static str;
}
