//! Architectural Contract Test: Cache Expiry and Restart
//!
//! Constraints verified:
//! - A handle is trusted up to the TTL and re-derived by search after it
//! - A restarted process reuses persisted handles instead of creating duplicates

mod common;

use chrono::DateTime;
use common::*;
use d2n_core::cache::ManualClock;
use d2n_core::{FileMappingCache, MappingCache, ReconcileOutcome, Reconciler};
use std::time::Duration;

const TTL: Duration = Duration::from_secs(300);

#[tokio::test]
async fn handle_trusted_until_ttl_then_searched() {
    let log = CallLog::default();
    let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    let cache = RecordingCache::with_clock(log.clone(), TTL, clock.clone());
    let store = MockRecordStore::new(log.clone());
    let (source, _events) = ScriptedEventSource::new(vec![]);

    let (reconciler, _rx) = Reconciler::new(
        Box::new(source),
        Box::new(store.clone()),
        Box::new(cache.clone()),
        &test_config(),
    )
    .unwrap();

    assert!(matches!(
        reconciler.reconcile(&snapshot("web")).await,
        ReconcileOutcome::Created { .. }
    ));

    clock.advance(TTL - Duration::from_secs(1));
    assert!(matches!(
        reconciler.reconcile(&snapshot("web")).await,
        ReconcileOutcome::UpdatedCached { .. }
    ));

    // A successful cached update does not restamp the entry
    clock.advance(Duration::from_secs(2));
    log.clear();
    let outcome = reconciler.reconcile(&snapshot("web")).await;

    assert!(matches!(outcome, ReconcileOutcome::UpdatedFound { .. }));
    assert_eq!(log.count(|c| matches!(c, Call::Find { .. })), 1);
    assert_eq!(log.count(|c| matches!(c, Call::Create { .. })), 0);
    assert_eq!(store.record_count(DEFAULT_BUCKET), 1);
}

#[tokio::test]
async fn restart_reuses_persisted_handle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("cache.json");
    let log = CallLog::default();
    let store = MockRecordStore::new(log.clone());

    {
        let cache = FileMappingCache::open(&path, TTL).await;
        let (source, _events) = ScriptedEventSource::new(vec![]);
        let (reconciler, _rx) = Reconciler::new(
            Box::new(source),
            Box::new(store.clone()),
            Box::new(cache),
            &test_config(),
        )
        .unwrap();
        reconciler.reconcile(&snapshot("web")).await;
    }

    log.clear();

    let cache = FileMappingCache::open(&path, TTL).await;
    assert!(cache.lookup("web").await.is_some());

    let (source, _events) = ScriptedEventSource::new(vec![]);
    let (reconciler, _rx) = Reconciler::new(
        Box::new(source),
        Box::new(store.clone()),
        Box::new(cache),
        &test_config(),
    )
    .unwrap();
    let outcome = reconciler.reconcile(&snapshot("web")).await;

    assert!(matches!(outcome, ReconcileOutcome::UpdatedCached { .. }));
    assert_eq!(log.count(|c| matches!(c, Call::Find { .. })), 0);
    assert_eq!(store.record_count(DEFAULT_BUCKET), 1);
}
