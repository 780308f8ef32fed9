// # d2n-core
//
// Core library for mirroring container lifecycle state into a remote record
// store (one record per container name).
//
// ## Architecture Overview
//
// - **HostEventSource**: Trait for container inventory, inspection and the live event stream
// - **RecordStore**: Trait for finding, creating and updating remote records
// - **MappingCache**: Trait for the name → record handle cache with TTL expiry
// - **Reconciler**: Drives cache and record store towards each container snapshot
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Reconciliation policy lives here, transports live in adapter crates
// 2. **Event-Driven**: One inventory pass, then one reconciliation per host event
// 3. **Library-First**: The daemon is a thin wrapper over this crate
// 4. **No Duplicates**: The cache is trusted only within its TTL, remote search is the fallback

pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod reconciler;
pub mod traits;

// Re-export core types for convenience
pub use cache::{Clock, FileMappingCache, MemoryMappingCache, SystemClock};
pub use config::{
    CacheConfig, D2nConfig, DockerConfig, DockerEndpoint, NotionConfig, TargetsConfig,
};
pub use error::{Error, Result};
pub use model::{EntitySnapshot, EntityStatus, RecordHandle, SyncPolicy};
pub use reconciler::{ReconcileEvent, ReconcileOutcome, Reconciler};
pub use traits::{HostEvent, HostEventSource, MappingCache, RecordStore};
