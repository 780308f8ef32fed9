// # Host Event Source Trait
//
// Defines the interface for reading container state from the host.
//
// ## Implementations
//
// - Docker Engine API: `d2n-docker` crate
//
// ## Usage
//
// ```rust,ignore
// use d2n_core::traits::{HostEventSource, WATCHED_ACTIONS};
// use tokio_stream::StreamExt;
//
// let source = /* HostEventSource implementation */;
//
// for snapshot in source.list_all().await? {
//     println!("{} is {}", snapshot.name(), snapshot.status());
// }
//
// let mut events = source.stream(WATCHED_ACTIONS);
// while let Some(event) = events.next().await {
//     println!("{} {}", event.action, event.name);
// }
//
// source.close().await;
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::model::{EntitySnapshot, SyncPolicy};

/// Lifecycle actions the reconciler subscribes to
pub const WATCHED_ACTIONS: &[EventAction] = &[
    EventAction::Create,
    EventAction::Start,
    EventAction::Stop,
    EventAction::Die,
    EventAction::Destroy,
];

/// Container lifecycle action reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventAction {
    Create,
    Start,
    Stop,
    Die,
    Destroy,
    /// Any action outside the watched set, kept verbatim
    Other(String),
}

impl EventAction {
    pub fn as_str(&self) -> &str {
        match self {
            EventAction::Create => "create",
            EventAction::Start => "start",
            EventAction::Stop => "stop",
            EventAction::Die => "die",
            EventAction::Destroy => "destroy",
            EventAction::Other(action) => action,
        }
    }

    /// Parse a raw action name
    ///
    /// Docker reports some actions with a suffix (`exec_start: sh`), only the
    /// part before `:` is significant.
    pub fn parse(raw: &str) -> Self {
        let action = raw.split(':').next().unwrap_or(raw).trim();
        match action {
            "create" => EventAction::Create,
            "start" => EventAction::Start,
            "stop" => EventAction::Stop,
            "die" => EventAction::Die,
            "destroy" => EventAction::Destroy,
            other => EventAction::Other(other.to_string()),
        }
    }

    /// Whether the entity no longer exists after this action
    pub fn is_destroy(&self) -> bool {
        matches!(self, EventAction::Destroy)
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw lifecycle event from the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    pub action: EventAction,
    /// Stable container id
    pub id: String,
    /// Container name as reported with the event
    pub name: String,
    /// Container labels attached to the event
    pub labels: HashMap<String, String>,
}

impl HostEvent {
    pub fn new(action: EventAction, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            action,
            id: id.into(),
            name: name.into(),
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sync policy carried by the event's labels
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy::from_labels(&self.labels)
    }
}

/// Trait for host event source implementations
///
/// # Ordering
///
/// The stream returned by [`HostEventSource::stream`] must yield events in the
/// order the host reported them. It is consumed by a single task and is never
/// restarted; it ends only when the source is closed or the connection drops.
///
/// # Allowed Capabilities
/// - ✅ Perform I/O against the host daemon
/// - ✅ Spawn one reader task per stream, stopped by [`HostEventSource::close`]
///
/// # Forbidden Capabilities
/// - ❌ Write to the record store or the mapping cache (owned by `Reconciler`)
/// - ❌ Decide whether a container is synced (owned by `Reconciler`)
#[async_trait]
pub trait HostEventSource: Send + Sync {
    /// Snapshot every container on the host, running or not
    async fn list_all(&self) -> Result<Vec<EntitySnapshot>, crate::Error>;

    /// Snapshot one container by id
    ///
    /// # Returns
    ///
    /// - `Ok(Some(snapshot))`: The container exists
    /// - `Ok(None)`: The host does not know this id (e.g. already removed)
    /// - `Err(Error)`: The lookup itself failed
    async fn get(&self, id: &str) -> Result<Option<EntitySnapshot>, crate::Error>;

    /// Subscribe to lifecycle events with the given actions
    fn stream(&self, actions: &[EventAction])
    -> Pin<Box<dyn Stream<Item = HostEvent> + Send + 'static>>;

    /// Release the connection to the host
    ///
    /// Idempotent: calling it more than once has no further effect.
    async fn close(&self);
}
