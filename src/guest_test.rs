use std::sync::atomic::{AtomicI64, Ordering};

use super::*;
use crate::identity::{ProviderError, ProviderErrorKind};
use crate::memory_provider::{MemoryIdentityProvider, ProviderCall};
use crate::storage::MemoryStore;

const NOW: i64 = 1_700_000_000_000;
const THRESHOLD: Duration = Duration::from_millis(6_000);

struct ManualClock(AtomicI64);

impl ManualClock {
    fn at(millis: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(millis)))
    }

    fn advance(&self, millis: i64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

struct Fixture {
    provider: Arc<MemoryIdentityProvider>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    manager: GuestSessionManager,
}

fn fixture() -> Fixture {
    let provider = Arc::new(MemoryIdentityProvider::new().with_id_prefix("g"));
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::at(NOW);
    let manager = GuestSessionManager::new(
        provider.clone(),
        GuestRecordStore::new(store.clone(), "repple-"),
        clock.clone(),
        THRESHOLD,
    );
    Fixture { provider, store, clock, manager }
}

fn record(f: &Fixture) -> StoredGuest {
    f.manager.records().load().unwrap()
}

// =============================================================================
// SystemClock / GuestRecord
// =============================================================================

#[test]
fn system_clock_is_after_2020() {
    assert!(SystemClock.now_millis() > 1_577_836_800_000);
}

#[test]
fn age_is_saturating() {
    let rec = GuestRecord { guest_id: "g1".into(), created_at_epoch_millis: i64::MIN };
    assert_eq!(rec.age_millis(i64::MAX), i64::MAX);
}

// =============================================================================
// GuestRecordStore
// =============================================================================

#[test]
fn record_store_uses_namespaced_keys() {
    let store = Arc::new(MemoryStore::new());
    let records = GuestRecordStore::new(store.clone(), "repple-");
    records
        .save(&GuestRecord { guest_id: "g1".into(), created_at_epoch_millis: 42 })
        .unwrap();
    assert_eq!(store.get("repple-guest_uid").unwrap().as_deref(), Some("g1"));
    assert_eq!(store.get("repple-guest_creation_time").unwrap().as_deref(), Some("42"));
}

#[test]
fn record_store_round_trip_and_erase() {
    let records = GuestRecordStore::new(Arc::new(MemoryStore::new()), "ns-");
    assert_eq!(records.load().unwrap(), StoredGuest::Absent);
    let rec = GuestRecord { guest_id: "g9".into(), created_at_epoch_millis: 7 };
    records.save(&rec).unwrap();
    assert_eq!(records.load().unwrap(), StoredGuest::Present(rec));
    records.erase().unwrap();
    assert_eq!(records.load().unwrap(), StoredGuest::Absent);
}

#[test]
fn record_store_partial_record_is_corrupt() {
    let store = Arc::new(MemoryStore::new());
    store.set("repple-guest_uid", "g1").unwrap();
    let records = GuestRecordStore::new(store, "repple-");
    assert_eq!(records.load().unwrap(), StoredGuest::Corrupt);
}

#[test]
fn record_store_non_numeric_timestamp_is_corrupt() {
    let store = Arc::new(MemoryStore::new());
    store.set("repple-guest_uid", "g1").unwrap();
    store.set("repple-guest_creation_time", "yesterday").unwrap();
    let records = GuestRecordStore::new(store, "repple-");
    assert_eq!(records.load().unwrap(), StoredGuest::Corrupt);
}

// =============================================================================
// ensure_guest_session
// =============================================================================

#[tokio::test]
async fn no_identity_no_record_creates_one_guest() {
    let f = fixture();
    let identity = f.manager.ensure_guest_session(&CancellationToken::new()).await.unwrap();

    assert_eq!(identity.id, "g1");
    assert!(identity.is_anonymous);
    assert_eq!(f.provider.calls(), vec![ProviderCall::CreateAnonymous]);
    assert_eq!(
        record(&f),
        StoredGuest::Present(GuestRecord { guest_id: "g1".into(), created_at_epoch_millis: NOW })
    );
}

#[tokio::test]
async fn valid_record_reuses_guest_without_provider_calls() {
    let f = fixture();
    let cancel = CancellationToken::new();
    let first = f.manager.ensure_guest_session(&cancel).await.unwrap();
    f.provider.clear_calls();
    f.clock.advance(5_000);

    let second = f.manager.ensure_guest_session(&cancel).await.unwrap();
    assert_eq!(second, first);
    assert!(f.provider.calls().is_empty());
}

#[tokio::test]
async fn age_equal_to_threshold_is_not_expired() {
    let f = fixture();
    let cancel = CancellationToken::new();
    let first = f.manager.ensure_guest_session(&cancel).await.unwrap();
    f.clock.advance(6_000);
    let second = f.manager.ensure_guest_session(&cancel).await.unwrap();
    assert_eq!(second.id, first.id);
}

#[tokio::test]
async fn expired_guest_is_deleted_and_replaced() {
    let f = fixture();
    let cancel = CancellationToken::new();
    let g1 = f.manager.ensure_guest_session(&cancel).await.unwrap();
    assert_eq!(g1.id, "g1");
    f.provider.clear_calls();
    f.clock.advance(10_000);

    let g2 = f.manager.ensure_guest_session(&cancel).await.unwrap();
    assert_eq!(g2.id, "g2");
    assert_eq!(
        f.provider.calls(),
        vec![ProviderCall::Delete { id: "g1".into() }, ProviderCall::CreateAnonymous]
    );
    assert!(f.provider.identity("g1").is_none());
    assert_eq!(
        record(&f),
        StoredGuest::Present(GuestRecord { guest_id: "g2".into(), created_at_epoch_millis: NOW + 10_000 })
    );
}

#[tokio::test]
async fn expired_record_for_other_identity_skips_delete() {
    let f = fixture();
    f.manager
        .records()
        .save(&GuestRecord { guest_id: "stale".into(), created_at_epoch_millis: NOW - 60_000 })
        .unwrap();

    let identity = f.manager.ensure_guest_session(&CancellationToken::new()).await.unwrap();
    assert_eq!(identity.id, "g1");
    assert_eq!(f.provider.calls(), vec![ProviderCall::CreateAnonymous]);
}

#[tokio::test]
async fn mismatched_fresh_record_is_cleared_and_replaced() {
    let f = fixture();
    f.manager
        .records()
        .save(&GuestRecord { guest_id: "other".into(), created_at_epoch_millis: NOW })
        .unwrap();

    let identity = f.manager.ensure_guest_session(&CancellationToken::new()).await.unwrap();
    assert_eq!(identity.id, "g1");
    assert_eq!(
        record(&f),
        StoredGuest::Present(GuestRecord { guest_id: "g1".into(), created_at_epoch_millis: NOW })
    );
}

#[tokio::test]
async fn corrupt_record_is_discarded() {
    let f = fixture();
    f.store.set("repple-guest_creation_time", "NaN").unwrap();
    let identity = f.manager.ensure_guest_session(&CancellationToken::new()).await.unwrap();
    assert_eq!(identity.id, "g1");
    assert!(matches!(record(&f), StoredGuest::Present(_)));
}

#[tokio::test]
async fn permanent_identity_bypasses_guest_logic() {
    let f = fixture();
    let user = f.provider.create_permanent_identity("a@b.co", "secret1").await.unwrap();
    f.provider.clear_calls();

    let identity = f.manager.ensure_guest_session(&CancellationToken::new()).await.unwrap();
    assert_eq!(identity, user);
    assert!(f.provider.calls().is_empty());
    assert_eq!(record(&f), StoredGuest::Absent);
}

// =============================================================================
// Failures and cancellation
// =============================================================================

#[tokio::test]
async fn create_failure_propagates_and_leaves_no_record() {
    let f = fixture();
    f.provider.fail_next(ProviderError::new(ProviderErrorKind::Network, "network down"));
    let err = f.manager.ensure_guest_session(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "network down");
    assert_eq!(record(&f), StoredGuest::Absent);
}

#[tokio::test]
async fn delete_failure_keeps_record_for_retry() {
    let f = fixture();
    let cancel = CancellationToken::new();
    f.manager.ensure_guest_session(&cancel).await.unwrap();
    f.clock.advance(10_000);
    f.provider.fail_next(ProviderError::new(ProviderErrorKind::Network, "timeout"));

    let err = f.manager.ensure_guest_session(&cancel).await.unwrap_err();
    assert!(matches!(err, AuthError::Provider(_)));
    assert!(matches!(record(&f), StoredGuest::Present(GuestRecord { ref guest_id, .. }) if guest_id == "g1"));
    assert!(f.provider.identity("g1").is_some());
}

#[tokio::test]
async fn cancelled_token_stops_before_provider_call_completes() {
    let f = fixture();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = f.manager.ensure_guest_session(&cancel).await.unwrap_err();
    assert!(matches!(err, AuthError::Cancelled));
    assert_eq!(record(&f), StoredGuest::Absent);
    assert_eq!(f.provider.account_count(), 0);
}
