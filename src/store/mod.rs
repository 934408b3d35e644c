//! The store abstraction.
//!
//! Tether talks to its backing store through the [`Store`] trait. Any
//! strongly consistent key-value store can back the toolkit if it offers:
//! TTL leases with keep-alive renewal, single-key transactions conditioned
//! on create-revision, prefix watches, explicit revoke, and session-bound
//! mutexes. Two backends ship in-tree: [`etcd::EtcdStore`] for production
//! and [`memory::MemoryStore`] for tests and local runs.

pub mod etcd;
pub mod memory;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

use crate::core::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Numeric handle of a store lease.
pub type LeaseId = i64;

/// Value stored under every lease-held key.
pub const LOCKED_VALUE: &str = "locked";

/// Operations a backing store must provide.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Read one key. `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Grant a fresh lease with the given TTL.
    async fn grant(&self, ttl: Duration) -> Result<LeaseId>;

    /// Revoke a lease, deleting every key attached to it.
    async fn revoke(&self, lease: LeaseId) -> Result<()>;

    /// Remaining TTL of a lease in whole seconds.
    ///
    /// Non-positive when the store no longer considers the lease valid.
    async fn time_to_live(&self, lease: LeaseId) -> Result<i64>;

    /// Open a keep-alive stream on a lease.
    ///
    /// The returned handle renews the lease until cancelled or until the
    /// store stops acknowledging.
    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAlive>;

    /// Create `key = value` under `lease` iff the key is absent.
    ///
    /// One transaction conditioned on the key's create-revision being zero.
    /// Returns whether the transaction succeeded.
    async fn put_if_absent(&self, key: &str, value: &str, lease: LeaseId) -> Result<bool>;

    /// Watch every key under a prefix.
    async fn watch_prefix(&self, prefix: &str) -> Result<PrefixWatch>;

    /// Open a session: a lease the backend renews on the caller's behalf.
    async fn open_session(&self, ttl: Duration) -> Result<Session>;

    /// Close a session, stopping renewal and revoking its lease.
    async fn close_session(&self, session: &Session) -> Result<()>;

    /// Acquire the named store mutex at `key`, bound to the session.
    ///
    /// Try-once: fails fast with the already-acquired kind when any
    /// session holds the name, never queueing behind the holder. Returns
    /// the ownership key to pass to [`Store::unlock`]. The mutex
    /// dissolves with the session.
    async fn lock(&self, key: &str, session: &Session) -> Result<String>;

    /// Release a store mutex by its ownership key.
    async fn unlock(&self, owner_key: &str) -> Result<()>;
}

// ============================================================================
// Handle types
// ============================================================================

/// A session: one backend-renewed lease plus a loss signal.
#[derive(Debug)]
pub struct Session {
    lease_id: LeaseId,
    done: CancellationToken,
    guard: CancellationToken,
}

impl Session {
    pub(crate) fn new(lease_id: LeaseId, done: CancellationToken, guard: CancellationToken) -> Self {
        Self {
            lease_id,
            done,
            guard,
        }
    }

    /// The lease backing this session.
    pub fn lease_id(&self) -> LeaseId {
        self.lease_id
    }

    /// Token cancelled when the store observes the session's lease expire.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// True once the session is known dead.
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    pub(crate) fn stop_renewal(&self) {
        self.guard.cancel();
    }
}

/// A keep-alive stream on one lease.
///
/// [`KeepAlive::recv`] yields the remaining TTL for every renewal the store
/// acknowledges and returns `None` once the stream closes - because renewal
/// failed, the lease vanished, or the handle was cancelled.
#[derive(Debug)]
pub struct KeepAlive {
    acks: mpsc::Receiver<i64>,
    guard: CancellationToken,
}

impl KeepAlive {
    pub(crate) fn new(acks: mpsc::Receiver<i64>, guard: CancellationToken) -> Self {
        Self { acks, guard }
    }

    /// Next acknowledged renewal, or `None` when the stream is closed.
    pub async fn recv(&mut self) -> Option<i64> {
        self.acks.recv().await
    }

    /// Token that stops the underlying renewal when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.guard.clone()
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.guard.cancel();
    }
}

/// A watch over every key under one prefix.
#[derive(Debug)]
pub struct PrefixWatch {
    events: mpsc::Receiver<()>,
    guard: CancellationToken,
}

impl PrefixWatch {
    pub(crate) fn new(events: mpsc::Receiver<()>, guard: CancellationToken) -> Self {
        Self { events, guard }
    }

    /// Wait for any change under the prefix.
    ///
    /// Returns `false` when the watch stream itself ended.
    pub async fn changed(&mut self) -> bool {
        self.events.recv().await.is_some()
    }
}

impl Drop for PrefixWatch {
    fn drop(&mut self) {
        self.guard.cancel();
    }
}
