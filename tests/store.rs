//! Tests for the in-process store backend.

use std::time::Duration;
use tether::store::{MemoryStore, Store, LOCKED_VALUE};
use tether::Error;

const TTL: Duration = Duration::from_secs(4);

// ============================================================================
// Keys and CAS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn put_if_absent_is_first_writer_wins() {
    let store = MemoryStore::new();
    let lease_a = store.grant(TTL).await.unwrap();
    let lease_b = store.grant(TTL).await.unwrap();

    assert!(store.put_if_absent("/k", LOCKED_VALUE, lease_a).await.unwrap());
    assert!(!store.put_if_absent("/k", LOCKED_VALUE, lease_b).await.unwrap());
    assert_eq!(store.key_lease("/k"), Some(lease_a));
    assert_eq!(store.get("/k").await.unwrap().as_deref(), Some(LOCKED_VALUE));
}

#[tokio::test(start_paused = true)]
async fn put_under_dead_lease_is_transport_error() {
    let store = MemoryStore::new();
    let lease = store.grant(TTL).await.unwrap();
    store.expire_lease(lease);

    let result = store.put_if_absent("/k", LOCKED_VALUE, lease).await;
    assert!(matches!(result, Err(Error::Unavailable(_))));
}

#[tokio::test(start_paused = true)]
async fn get_missing_key_is_none() {
    let store = MemoryStore::new();
    assert_eq!(store.get("/nope").await.unwrap(), None);
}

// ============================================================================
// Lease lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn expiry_deletes_attached_keys() {
    let store = MemoryStore::new();
    let lease = store.grant(TTL).await.unwrap();
    store.put_if_absent("/a", LOCKED_VALUE, lease).await.unwrap();
    store.put_if_absent("/b", LOCKED_VALUE, lease).await.unwrap();

    // Nothing renews the lease, so the sweeper reclaims it after the TTL.
    tokio::time::sleep(TTL + Duration::from_secs(1)).await;
    assert!(!store.lease_exists(lease));
    assert!(!store.key_exists("/a"));
    assert!(!store.key_exists("/b"));
}

#[tokio::test(start_paused = true)]
async fn keep_alive_holds_the_lease_up() {
    let store = MemoryStore::new();
    let lease = store.grant(TTL).await.unwrap();
    store.put_if_absent("/a", LOCKED_VALUE, lease).await.unwrap();
    let mut keep_alive = store.keep_alive(lease).await.unwrap();

    let drain = tokio::spawn(async move { while keep_alive.recv().await.is_some() {} });

    tokio::time::sleep(3 * TTL).await;
    assert!(store.lease_exists(lease));
    assert!(store.key_exists("/a"));

    // Forced expiry closes the stream.
    store.expire_lease(lease);
    tokio::time::timeout(TTL, drain).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn time_to_live_reports_vanished_leases() {
    let store = MemoryStore::new();
    let lease = store.grant(TTL).await.unwrap();
    assert!(store.time_to_live(lease).await.unwrap() > 0);

    store.expire_lease(lease);
    assert!(store.time_to_live(lease).await.unwrap() <= 0);
}

#[tokio::test(start_paused = true)]
async fn revoke_missing_lease_is_an_error() {
    let store = MemoryStore::new();
    let lease = store.grant(TTL).await.unwrap();
    store.revoke(lease).await.unwrap();
    assert!(store.revoke(lease).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn suspend_lets_a_lease_age_out() {
    let store = MemoryStore::new();
    let lease = store.grant(TTL).await.unwrap();
    let mut keep_alive = store.keep_alive(lease).await.unwrap();
    tokio::spawn(async move { while keep_alive.recv().await.is_some() {} });

    store.suspend_lease(lease);
    tokio::time::sleep(TTL + Duration::from_secs(1)).await;
    assert!(!store.lease_exists(lease));
}

// ============================================================================
// Watches
// ============================================================================

#[tokio::test(start_paused = true)]
async fn prefix_watch_sees_creation_and_expiry() {
    let store = MemoryStore::new();
    let mut watch = store.watch_prefix("/pool/").await.unwrap();

    let lease = store.grant(TTL).await.unwrap();
    store
        .put_if_absent("/pool/1", LOCKED_VALUE, lease)
        .await
        .unwrap();
    assert!(watch.changed().await);

    store.expire_lease(lease);
    assert!(watch.changed().await);
}

#[tokio::test(start_paused = true)]
async fn prefix_watch_ignores_other_prefixes() {
    let store = MemoryStore::new();
    let mut watch = store.watch_prefix("/pool/").await.unwrap();

    let lease = store.grant(TTL).await.unwrap();
    store
        .put_if_absent("/elsewhere/1", LOCKED_VALUE, lease)
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), watch.changed()).await;
    assert!(outcome.is_err(), "watch fired for an unrelated prefix");
}

// ============================================================================
// Sessions and locks
// ============================================================================

#[tokio::test(start_paused = true)]
async fn session_outlives_its_ttl_through_renewal() {
    let store = MemoryStore::new();
    let session = store.open_session(TTL).await.unwrap();

    tokio::time::sleep(3 * TTL).await;
    assert!(!session.is_done());

    store.close_session(&session).await.unwrap();
    assert!(!store.lease_exists(session.lease_id()));
}

#[tokio::test(start_paused = true)]
async fn forced_expiry_fires_the_done_token() {
    let store = MemoryStore::new();
    let session = store.open_session(TTL).await.unwrap();
    let done = session.done();

    store.expire_lease(session.lease_id());
    tokio::time::timeout(Duration::from_secs(1), done.cancelled())
        .await
        .expect("done token did not fire");
}

#[tokio::test(start_paused = true)]
async fn lock_is_exclusive_until_unlock() {
    let store = MemoryStore::new();
    let session_a = store.open_session(TTL).await.unwrap();
    let session_b = store.open_session(TTL).await.unwrap();

    let owner = store.lock("/locks/svc/mutexes/m", &session_a).await.unwrap();
    assert!(matches!(
        store.lock("/locks/svc/mutexes/m", &session_b).await,
        Err(Error::MutexAlreadyAcquired)
    ));

    store.unlock(&owner).await.unwrap();
    store.lock("/locks/svc/mutexes/m", &session_b).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn lock_dissolves_with_its_session() {
    let store = MemoryStore::new();
    let session_a = store.open_session(TTL).await.unwrap();
    let session_b = store.open_session(TTL).await.unwrap();

    store.lock("/locks/svc/mutexes/m", &session_a).await.unwrap();
    store.expire_lease(session_a.lease_id());

    store.lock("/locks/svc/mutexes/m", &session_b).await.unwrap();
}

// ============================================================================
// Fault injection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn injected_faults_fail_then_clear() {
    let store = MemoryStore::new();
    store.fail_next(2);
    assert!(store.get("/k").await.is_err());
    assert!(store.grant(TTL).await.is_err());
    assert!(store.get("/k").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn injected_latency_delays_operations() {
    let store = MemoryStore::new();
    store.set_latency(Some(Duration::from_millis(500)));

    let before = tokio::time::Instant::now();
    store.get("/k").await.unwrap();
    assert!(before.elapsed() >= Duration::from_millis(500));
}
