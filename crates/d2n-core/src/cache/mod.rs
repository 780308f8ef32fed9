// # Mapping Cache Implementations
//
// This module provides implementations of the MappingCache trait for
// different persistence strategies.

pub mod clock;
pub mod file;
pub mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use file::FileMappingCache;
pub use memory::MemoryMappingCache;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::RecordHandle;

/// Default time-to-live for cache entries
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// One cached name → handle mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Remote record handle (older cache files call this `page_id`)
    #[serde(alias = "page_id")]
    pub handle: RecordHandle,
    /// Write time in seconds since the Unix epoch
    pub timestamp: f64,
}

impl CacheEntry {
    pub(crate) fn new(handle: RecordHandle, now: DateTime<Utc>) -> Self {
        Self {
            handle,
            timestamp: epoch_secs(now),
        }
    }

    /// An entry is expired once strictly more than `ttl` has elapsed
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        epoch_secs(now) - self.timestamp > ttl.as_secs_f64()
    }
}

fn epoch_secs(time: DateTime<Utc>) -> f64 {
    time.timestamp() as f64 + f64::from(time.timestamp_subsec_nanos()) / 1_000_000_000.0
}
