//! Test doubles and common utilities for reconciliation contract tests
//!
//! The record store and the cache share one call log so tests can assert
//! the relative order of cache and remote operations.

#![allow(dead_code)]

use chrono::{DateTime, FixedOffset};
use d2n_core::cache::ManualClock;
use d2n_core::config::{DatabaseTarget, EngineConfig};
use d2n_core::error::{Error, Result};
use d2n_core::traits::EventAction;
use d2n_core::{
    CacheConfig, D2nConfig, DockerConfig, EntitySnapshot, EntityStatus, HostEvent,
    HostEventSource, MappingCache, MemoryMappingCache, NotionConfig, RecordHandle, RecordStore,
    SyncPolicy, TargetsConfig,
};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::Stream;

pub const DEFAULT_BUCKET: &str = "db-containers";
pub const INFRA_BUCKET: &str = "db-infra";

/// One observed collaborator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Find { bucket: String, name: String },
    Create { bucket: String, name: String },
    Update { handle: String, status: EntityStatus },
    Lookup(String),
    Store(String, String),
    Remove(String),
    Flush,
}

/// Shared, ordered call log
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    /// Only the remote store calls, in order
    pub fn remote_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Find { .. } | Call::Create { .. } | Call::Update { .. }))
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    /// Index of the first call matching `pred`
    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(|c| pred(c))
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// A fixed last-seen timestamp
pub fn seen() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00+09:00").unwrap()
}

/// An enabled, running snapshot in the default bucket
pub fn snapshot(name: &str) -> EntitySnapshot {
    EntitySnapshot::new(format!("id-{}", name), name, EntityStatus::Running, seen())
        .unwrap()
        .with_policy(SyncPolicy::enabled())
}

pub fn disabled_snapshot(name: &str) -> EntitySnapshot {
    EntitySnapshot::new(format!("id-{}", name), name, EntityStatus::Running, seen()).unwrap()
}

/// Targets with a default bucket and one named `infra` bucket
pub fn test_config() -> D2nConfig {
    D2nConfig {
        docker: DockerConfig {
            api_url: "tcp://127.0.0.1:2375".to_string(),
        },
        notion: NotionConfig::new("secret_test"),
        targets: TargetsConfig {
            databases: vec![
                DatabaseTarget {
                    name: "containers".to_string(),
                    database_id: DEFAULT_BUCKET.to_string(),
                },
                DatabaseTarget {
                    name: "infra".to_string(),
                    database_id: INFRA_BUCKET.to_string(),
                },
            ],
            default: "containers".to_string(),
        },
        cache: CacheConfig::default(),
        timezone: "Asia/Seoul".to_string(),
        engine: EngineConfig::default(),
    }
}

/// A host event source fed by the test through a channel
#[derive(Clone)]
pub struct ScriptedEventSource {
    inventory: Vec<EntitySnapshot>,
    entities: Arc<Mutex<HashMap<String, EntitySnapshot>>>,
    failing_gets: Arc<Mutex<HashSet<String>>>,
    engine_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<HostEvent>>>>,
    list_call_count: Arc<AtomicUsize>,
    get_call_count: Arc<AtomicUsize>,
    stream_call_count: Arc<AtomicUsize>,
    close_call_count: Arc<AtomicUsize>,
}

impl ScriptedEventSource {
    /// Create a source with the given inventory; every inventory entity is also
    /// returned by `get`
    pub fn new(inventory: Vec<EntitySnapshot>) -> (Self, mpsc::UnboundedSender<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let entities = inventory
            .iter()
            .map(|s| (s.id().to_string(), s.clone()))
            .collect();

        let source = Self {
            inventory,
            entities: Arc::new(Mutex::new(entities)),
            failing_gets: Arc::new(Mutex::new(HashSet::new())),
            engine_rx: Arc::new(Mutex::new(Some(rx))),
            list_call_count: Arc::new(AtomicUsize::new(0)),
            get_call_count: Arc::new(AtomicUsize::new(0)),
            stream_call_count: Arc::new(AtomicUsize::new(0)),
            close_call_count: Arc::new(AtomicUsize::new(0)),
        };

        (source, tx)
    }

    /// Make `get(id)` return this snapshot
    pub fn put_entity(&self, snapshot: EntitySnapshot) {
        self.entities
            .lock()
            .unwrap()
            .insert(snapshot.id().to_string(), snapshot);
    }

    /// Make `get(id)` fail
    pub fn fail_get(&self, id: &str) {
        self.failing_gets.lock().unwrap().insert(id.to_string());
    }

    pub fn list_call_count(&self) -> usize {
        self.list_call_count.load(Ordering::SeqCst)
    }

    pub fn get_call_count(&self) -> usize {
        self.get_call_count.load(Ordering::SeqCst)
    }

    pub fn stream_call_count(&self) -> usize {
        self.stream_call_count.load(Ordering::SeqCst)
    }

    pub fn close_call_count(&self) -> usize {
        self.close_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HostEventSource for ScriptedEventSource {
    async fn list_all(&self) -> Result<Vec<EntitySnapshot>> {
        self.list_call_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.inventory.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<EntitySnapshot>> {
        self.get_call_count.fetch_add(1, Ordering::SeqCst);
        if self.failing_gets.lock().unwrap().contains(id) {
            return Err(Error::event_source(format!("inspect {} failed", id)));
        }
        Ok(self.entities.lock().unwrap().get(id).cloned())
    }

    fn stream(&self, _actions: &[EventAction]) -> Pin<Box<dyn Stream<Item = HostEvent> + Send + 'static>> {
        self.stream_call_count.fetch_add(1, Ordering::SeqCst);

        let rx = self
            .engine_rx
            .lock()
            .unwrap()
            .take()
            .expect("stream() can only be called once");

        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }

    async fn close(&self) {
        self.close_call_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// A record store backed by an in-memory table, with injectable failures
#[derive(Clone)]
pub struct MockRecordStore {
    log: CallLog,
    /// (bucket, name) → handle
    records: Arc<Mutex<HashMap<(String, String), RecordHandle>>>,
    /// Handle → last written status
    written: Arc<Mutex<HashMap<String, EntityStatus>>>,
    failing_finds: Arc<Mutex<HashSet<String>>>,
    failing_updates: Arc<Mutex<HashSet<String>>>,
    fail_creates: Arc<Mutex<bool>>,
    next_id: Arc<AtomicUsize>,
    update_delay: Arc<Mutex<Option<Duration>>>,
}

impl MockRecordStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            records: Arc::new(Mutex::new(HashMap::new())),
            written: Arc::new(Mutex::new(HashMap::new())),
            failing_finds: Arc::new(Mutex::new(HashSet::new())),
            failing_updates: Arc::new(Mutex::new(HashSet::new())),
            fail_creates: Arc::new(Mutex::new(false)),
            next_id: Arc::new(AtomicUsize::new(1)),
            update_delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Seed an existing remote record
    pub fn seed(&self, bucket: &str, name: &str, handle: &str) {
        self.records.lock().unwrap().insert(
            (bucket.to_string(), name.to_string()),
            RecordHandle::new(handle),
        );
    }

    pub fn fail_find(&self, name: &str) {
        self.failing_finds.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_update(&self, handle: &str) {
        self.failing_updates.lock().unwrap().insert(handle.to_string());
    }

    pub fn fail_creates(&self) {
        *self.fail_creates.lock().unwrap() = true;
    }

    /// Make every update take this long
    pub fn delay_updates(&self, delay: Duration) {
        *self.update_delay.lock().unwrap() = Some(delay);
    }

    /// Number of records in a bucket
    pub fn record_count(&self, bucket: &str) -> usize {
        self.records
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .count()
    }

    /// Last status successfully written to a handle
    pub fn written_status(&self, handle: &str) -> Option<EntityStatus> {
        self.written.lock().unwrap().get(handle).copied()
    }

    fn knows_handle(&self, handle: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .values()
            .any(|h| h.as_str() == handle)
    }
}

#[async_trait::async_trait]
impl RecordStore for MockRecordStore {
    async fn find(&self, bucket: &str, name: &str) -> Result<Option<RecordHandle>> {
        self.log.push(Call::Find {
            bucket: bucket.to_string(),
            name: name.to_string(),
        });

        if self.failing_finds.lock().unwrap().contains(name) {
            return Err(Error::transport("connection reset"));
        }

        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, bucket: &str, snapshot: &EntitySnapshot) -> Result<RecordHandle> {
        self.log.push(Call::Create {
            bucket: bucket.to_string(),
            name: snapshot.name().to_string(),
        });

        if *self.fail_creates.lock().unwrap() {
            return Err(Error::provider("mock", "create rejected"));
        }

        let handle = RecordHandle::new(format!(
            "page-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        self.records.lock().unwrap().insert(
            (bucket.to_string(), snapshot.name().to_string()),
            handle.clone(),
        );
        self.written
            .lock()
            .unwrap()
            .insert(handle.as_str().to_string(), snapshot.status());

        Ok(handle)
    }

    async fn update(&self, handle: &RecordHandle, snapshot: &EntitySnapshot) -> Result<()> {
        self.log.push(Call::Update {
            handle: handle.as_str().to_string(),
            status: snapshot.status(),
        });

        let delay = *self.update_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_updates.lock().unwrap().contains(handle.as_str()) {
            return Err(Error::transport("update timed out"));
        }
        if !self.knows_handle(handle.as_str()) {
            return Err(Error::not_found(format!("page {}", handle)));
        }

        self.written
            .lock()
            .unwrap()
            .insert(handle.as_str().to_string(), snapshot.status());

        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "mock"
    }
}

/// A memory cache that records every call into the shared log
#[derive(Clone)]
pub struct RecordingCache {
    log: CallLog,
    inner: MemoryMappingCache,
}

impl RecordingCache {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            inner: MemoryMappingCache::default(),
        }
    }

    pub fn with_clock(log: CallLog, ttl: Duration, clock: ManualClock) -> Self {
        Self {
            log,
            inner: MemoryMappingCache::with_clock(ttl, Arc::new(clock)),
        }
    }

    /// Seed an entry without logging
    pub async fn seed(&self, name: &str, handle: &str) {
        self.inner.store(name, &RecordHandle::new(handle)).await;
    }

    /// Whether an entry exists, without logging or expiring it
    pub async fn contains(&self, name: &str) -> bool {
        self.inner.contains(name).await
    }

    /// Current handle, without logging
    pub async fn peek(&self, name: &str) -> Option<RecordHandle> {
        self.inner.lookup(name).await
    }
}

#[async_trait::async_trait]
impl MappingCache for RecordingCache {
    async fn lookup(&self, name: &str) -> Option<RecordHandle> {
        self.log.push(Call::Lookup(name.to_string()));
        self.inner.lookup(name).await
    }

    async fn store(&self, name: &str, handle: &RecordHandle) {
        self.log
            .push(Call::Store(name.to_string(), handle.as_str().to_string()));
        self.inner.store(name, handle).await
    }

    async fn remove(&self, name: &str) {
        self.log.push(Call::Remove(name.to_string()));
        self.inner.remove(name).await
    }

    async fn flush(&self) -> Result<()> {
        self.log.push(Call::Flush);
        self.inner.flush().await
    }
}

/// Everything a reconciler test needs, with handles kept for assertions
pub struct Harness {
    pub log: CallLog,
    pub source: ScriptedEventSource,
    pub events: mpsc::UnboundedSender<HostEvent>,
    pub store: MockRecordStore,
    pub cache: RecordingCache,
}

impl Harness {
    pub fn new(inventory: Vec<EntitySnapshot>) -> Self {
        let log = CallLog::default();
        let (source, events) = ScriptedEventSource::new(inventory);
        Self {
            store: MockRecordStore::new(log.clone()),
            cache: RecordingCache::new(log.clone()),
            log,
            source,
            events,
        }
    }

    /// Build a reconciler sharing this harness's doubles
    pub fn reconciler(
        &self,
    ) -> (
        d2n_core::Reconciler,
        mpsc::Receiver<d2n_core::ReconcileEvent>,
    ) {
        d2n_core::Reconciler::new(
            Box::new(self.source.clone()),
            Box::new(self.store.clone()),
            Box::new(self.cache.clone()),
            &test_config(),
        )
        .expect("reconciler construction succeeds")
    }
}

/// Wait (bounded) for the next reconcile event matching `pred`
pub async fn wait_for(
    rx: &mut mpsc::Receiver<d2n_core::ReconcileEvent>,
    pred: impl Fn(&d2n_core::ReconcileEvent) -> bool,
) -> d2n_core::ReconcileEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("reconciler event channel closed"),
            }
        }
    })
    .await
    .expect("expected reconcile event within 5 seconds")
}

/// Wait for the outcome of reconciling `name`
pub async fn outcome_for(
    rx: &mut mpsc::Receiver<d2n_core::ReconcileEvent>,
    name: &str,
) -> d2n_core::ReconcileOutcome {
    match wait_for(rx, |e| {
        matches!(e, d2n_core::ReconcileEvent::Reconciled { name: n, .. } if n == name)
    })
    .await
    {
        d2n_core::ReconcileEvent::Reconciled { outcome, .. } => outcome,
        other => panic!("unexpected event {:?}", other),
    }
}
