//! Core traits for the d2n system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`HostEventSource`]: Container inventory, inspection and lifecycle events
//! - [`RecordStore`]: Remote record lookups, creates and updates
//! - [`MappingCache`]: Name → record handle cache with TTL expiry

pub mod event_source;
pub mod mapping_cache;
pub mod record_store;

pub use event_source::{EventAction, HostEvent, HostEventSource, WATCHED_ACTIONS};
pub use mapping_cache::MappingCache;
pub use record_store::RecordStore;
