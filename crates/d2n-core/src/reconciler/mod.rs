//! Reconciler
//!
//! The Reconciler is responsible for:
//! - Running one full-inventory pass at startup
//! - Consuming host lifecycle events one at a time, in arrival order
//! - Converging the remote record and the mapping cache for each entity
//! - Recovering from stale cache entries and failed remote writes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ HostEventSource │─── inventory / HostEvent ───┐
//! └─────────────────┘                             │
//!                                                 ▼
//!                                        ┌──────────────┐
//!                                        │  Reconciler  │
//!                                        └──────────────┘
//!                                                 │
//!         ┌───────────────────────────────────────┼───────────────────────┐
//!         │                                       │                       │
//!         ▼                                       ▼                       ▼
//! ┌──────────────┐                       ┌──────────────┐         ┌─────────────┐
//! │ MappingCache │                       │ RecordStore  │         │   Events    │
//! │ (lookup)     │                       │ (find/write) │         │  (notify)   │
//! └──────────────┘                       └──────────────┘         └─────────────┘
//! ```
//!
//! ## Reconciliation (one entity)
//!
//! 1. Disabled entities are skipped without touching cache or store
//! 2. A cached handle is tried first with one update
//! 3. If that update fails the entry is evicted and the search path runs once
//! 4. Search: found → cache + one update, not found → create + cache
//!
//! Per entity the states are `NoRecord → Tracked(handle)`, back to `NoRecord`
//! on a failed update or a destroy event. Nothing is ever in flight between
//! events because every step completes before the next event is read.

use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{BucketMap, D2nConfig};
use crate::error::{Error, Result};
use crate::model::{EntitySnapshot, RecordHandle, observed_now};
use crate::traits::{HostEvent, HostEventSource, MappingCache, RecordStore, WATCHED_ACTIONS};

/// Result of reconciling one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Sync disabled for this entity; nothing was touched
    Skipped,

    /// The cached handle was updated
    UpdatedCached { handle: RecordHandle },

    /// The record was found by search, cached and updated
    UpdatedFound { handle: RecordHandle },

    /// The record was found by search and cached, but the update failed
    UpdateFailed { handle: RecordHandle },

    /// A new record was created and cached
    Created { handle: RecordHandle },

    /// No record existed and creating one failed
    CreateFailed,

    /// The search itself failed, so the event was abandoned
    SearchFailed,
}

impl ReconcileOutcome {
    /// Whether the remote record now reflects the snapshot
    pub fn is_current(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::UpdatedCached { .. }
                | ReconcileOutcome::UpdatedFound { .. }
                | ReconcileOutcome::Created { .. }
        )
    }
}

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// Inventory pass started
    Started { inventory_count: usize },

    /// One entity was reconciled
    Reconciled {
        name: String,
        outcome: ReconcileOutcome,
    },

    /// A destroy event evicted the cache entry for a name
    Evicted { name: String },

    /// An event was dropped before reconciliation
    EventSkipped { id: String, reason: String },

    /// Reconciler stopped
    Stopped { reason: String },
}

/// Reconciliation engine
///
/// ## Lifecycle
///
/// 1. Create with [`Reconciler::new()`]
/// 2. Start with [`Reconciler::run()`] and a cancellation token
/// 3. Cancel the token to stop; the in-flight reconciliation finishes first
/// 4. `run()` closes the host event source before returning
///
/// ## Threading
///
/// All reconciliations run sequentially on the task that calls `run()`.
/// No two reconciliations overlap, even for different entities.
pub struct Reconciler {
    /// Host inventory and events
    source: Box<dyn HostEventSource>,

    /// Remote record store
    store: Box<dyn RecordStore>,

    /// Name → handle cache
    cache: Box<dyn MappingCache>,

    /// Group → bucket resolution
    buckets: BucketMap,

    /// Timezone for synthesized snapshots
    timezone: Tz,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ReconcileEvent>,
}

impl Reconciler {
    /// Create a new reconciler
    ///
    /// # Returns
    ///
    /// A tuple of (reconciler, event_receiver) where event_receiver yields
    /// reconcile events. Fails if the targets configuration is invalid.
    pub fn new(
        source: Box<dyn HostEventSource>,
        store: Box<dyn RecordStore>,
        cache: Box<dyn MappingCache>,
        config: &D2nConfig,
    ) -> Result<(Self, mpsc::Receiver<ReconcileEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity.max(1));

        let reconciler = Self {
            source,
            store,
            cache,
            buckets: config.targets.bucket_map()?,
            timezone: config.resolved_timezone(),
            event_tx: tx,
        };

        Ok((reconciler, rx))
    }

    /// Run until `cancel` fires or the event stream ends
    ///
    /// Performs the inventory pass, then reconciles one entity per host event.
    /// The host event source is closed on every exit path.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Cancelled
    /// - `Err(Error)`: The event stream ended unexpectedly
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let result = self.run_until_cancelled(&cancel).await;

        let reason = match &result {
            Ok(()) => "Shutdown signal".to_string(),
            Err(e) => e.to_string(),
        };

        self.source.close().await;

        if let Err(e) = self.cache.flush().await {
            warn!("Failed to flush mapping cache on shutdown: {}", e);
        }

        info!("Reconciler stopped: {}", reason);
        self.emit_event(ReconcileEvent::Stopped { reason });

        result
    }

    async fn run_until_cancelled(&self, cancel: &CancellationToken) -> Result<()> {
        // Subscribe before the inventory pass so events raised during it are buffered
        let mut events = self.source.stream(WATCHED_ACTIONS);

        self.sync_all(cancel).await;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }

                next = events.next() => match next {
                    Some(event) => {
                        // Not raced against cancellation: the write completes first
                        self.handle_event(event).await;
                    }
                    None => {
                        return Err(Error::event_source("host event stream ended unexpectedly"));
                    }
                },
            }
        }
    }

    /// Reconcile every entity currently on the host
    ///
    /// Stops early (between entities) if `cancel` fires. A failed inventory
    /// read is logged and treated as an empty inventory.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> usize {
        let inventory = match self.source.list_all().await {
            Ok(inventory) => inventory,
            Err(e) => {
                error!("Error listing containers: {}", e);
                Vec::new()
            }
        };

        info!("Initial sync: Found {} containers.", inventory.len());
        self.emit_event(ReconcileEvent::Started {
            inventory_count: inventory.len(),
        });

        let mut reconciled = 0;
        for snapshot in &inventory {
            if cancel.is_cancelled() {
                info!(
                    "Initial sync interrupted after {} of {} containers",
                    reconciled,
                    inventory.len()
                );
                break;
            }
            self.reconcile(snapshot).await;
            reconciled += 1;
        }

        reconciled
    }

    /// Turn one host event into a reconciliation
    ///
    /// Destroy events reconcile a synthesized `removed` snapshot and then
    /// evict the cache entry whatever the outcome. Other events are hydrated
    /// from the host; an event whose entity cannot be read is skipped.
    pub async fn handle_event(&self, event: HostEvent) -> Option<ReconcileOutcome> {
        info!(
            "Detected event: {} for container {}",
            event.action,
            if event.name.is_empty() { &event.id } else { &event.name }
        );

        if event.id.is_empty() {
            self.skip_event(&event, "event carries no entity id");
            return None;
        }

        if event.action.is_destroy() {
            return self.handle_destroy(event).await;
        }

        match self.source.get(&event.id).await {
            Ok(Some(snapshot)) => Some(self.reconcile(&snapshot).await),
            Ok(None) => {
                self.skip_event(&event, "entity no longer exists");
                None
            }
            Err(e) => {
                warn!("Failed to get info for container {}: {}", event.id, e);
                self.skip_event(&event, &e.to_string());
                None
            }
        }
    }

    async fn handle_destroy(&self, event: HostEvent) -> Option<ReconcileOutcome> {
        let snapshot = match EntitySnapshot::removed(
            event.id.clone(),
            &event.name,
            observed_now(self.timezone),
            event.policy(),
        ) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.skip_event(&event, &e.to_string());
                return None;
            }
        };

        let outcome = self.reconcile(&snapshot).await;

        // A reused name must never pick up the destroyed entity's handle
        self.cache.remove(snapshot.name()).await;
        debug!("Evicted cache entry for destroyed container {}", snapshot.name());
        self.emit_event(ReconcileEvent::Evicted {
            name: snapshot.name().to_string(),
        });

        Some(outcome)
    }

    /// Converge the remote record and the cache for one snapshot
    ///
    /// Issues at most: one update of a cached handle, one search, and then
    /// either one update of the found handle or one create.
    pub async fn reconcile(&self, snapshot: &EntitySnapshot) -> ReconcileOutcome {
        let outcome = self.reconcile_inner(snapshot).await;
        self.emit_event(ReconcileEvent::Reconciled {
            name: snapshot.name().to_string(),
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn reconcile_inner(&self, snapshot: &EntitySnapshot) -> ReconcileOutcome {
        let name = snapshot.name();

        if !snapshot.policy().enabled {
            info!("Skipping container {} as sync is not enabled.", name);
            return ReconcileOutcome::Skipped;
        }

        let bucket = self.buckets.resolve(snapshot.policy().group.as_deref());

        if let Some(handle) = self.cache.lookup(name).await {
            match self.store.update(&handle, snapshot).await {
                Ok(()) => {
                    info!("Updated existing record for {} (ID: {})", name, handle);
                    return ReconcileOutcome::UpdatedCached { handle };
                }
                Err(e) => {
                    warn!(
                        "Failed to update record {} for {}: {}. Invalidating cache and retrying...",
                        handle, name, e
                    );
                    self.cache.remove(name).await;
                }
            }
        }

        self.find_or_create(bucket, snapshot).await
    }

    async fn find_or_create(&self, bucket: &str, snapshot: &EntitySnapshot) -> ReconcileOutcome {
        let name = snapshot.name();

        info!(
            "Searching {} for existing record: {}",
            self.store.store_name(),
            name
        );

        match self.store.find(bucket, name).await {
            Ok(Some(handle)) => {
                info!("Found existing record {} for {}. Updating cache.", handle, name);
                self.cache.store(name, &handle).await;

                // Terminal: a second failure is only logged
                match self.store.update(&handle, snapshot).await {
                    Ok(()) => {
                        info!("Updated found record {} for {}", handle, name);
                        ReconcileOutcome::UpdatedFound { handle }
                    }
                    Err(e) => {
                        error!("Failed to update found record {} for {}: {}", handle, name, e);
                        ReconcileOutcome::UpdateFailed { handle }
                    }
                }
            }
            Ok(None) => {
                info!("No existing record found for {}, creating new record...", name);
                match self.store.create(bucket, snapshot).await {
                    Ok(handle) => {
                        info!("Created new record {} for {}", handle, name);
                        self.cache.store(name, &handle).await;
                        ReconcileOutcome::Created { handle }
                    }
                    Err(e) => {
                        error!("Failed to create record for {}: {}", name, e);
                        ReconcileOutcome::CreateFailed
                    }
                }
            }
            Err(e) => {
                // Creating here could duplicate a record the search failed to see
                error!(
                    "Search for {} failed: {}. Leaving record untouched for this event.",
                    name, e
                );
                ReconcileOutcome::SearchFailed
            }
        }
    }

    fn skip_event(&self, event: &HostEvent, reason: &str) {
        debug!("Skipping {} event for {}: {}", event.action, event.id, reason);
        self.emit_event(ReconcileEvent::EventSkipped {
            id: event.id.clone(),
            reason: reason.to_string(),
        });
    }

    /// Emit a reconcile event
    fn emit_event(&self, event: ReconcileEvent) {
        // Dropping is preferred to blocking reconciliation on a slow consumer
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => warn!(
                "Event channel full, dropping event. Consider increasing event_channel_capacity."
            ),
            // Nobody is listening
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
