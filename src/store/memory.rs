//! In-process store backend.
//!
//! `MemoryStore` implements the full [`Store`](super::Store) contract
//! against process-local state: create-revision bookkeeping, lease records
//! with deadlines and attached keys, prefix watch notification, and
//! session-bound mutexes. A background sweeper expires overdue leases,
//! deletes their keys, wakes watchers, and kills dependent sessions -
//! the same cascade a real store performs server-side.
//!
//! The backend doubles as the test harness: latency injection, forced
//! faults, and forced lease expiry let tests drive every branch of the
//! supervisor state machines without a server.

use crate::core::error::{Error, Result};
use crate::store::{KeepAlive, LeaseId, PrefixWatch, Session, Store};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How often the sweeper checks for overdue leases.
const SWEEP_PERIOD: Duration = Duration::from_millis(100);

/// A key record.
#[derive(Debug, Clone)]
struct KeyRecord {
    value: String,
    create_revision: u64,
    lease: LeaseId,
}

/// A lease record: TTL, deadline, and the keys it holds alive.
#[derive(Debug)]
struct LeaseRecord {
    ttl: Duration,
    deadline: Instant,
    keys: HashSet<String>,
    /// Renewals stop extending the deadline once suspended.
    suspended: bool,
}

#[derive(Default)]
struct State {
    revision: u64,
    keys: BTreeMap<String, KeyRecord>,
    leases: HashMap<LeaseId, LeaseRecord>,
    /// Done tokens of sessions, cancelled when their lease dies.
    sessions: HashMap<LeaseId, CancellationToken>,
    next_lease_id: LeaseId,
    /// Number of upcoming operations that fail with an injected fault.
    fail_next: u32,
}

/// In-process implementation of the store contract.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    /// Touched-key feed backing prefix watches.
    touched: broadcast::Sender<String>,
    latency: Arc<Mutex<Option<Duration>>>,
    sweeper: CancellationToken,
}

impl MemoryStore {
    /// Create a store and start its expiry sweeper.
    pub fn new() -> Self {
        let (touched, _) = broadcast::channel(1024);
        let store = Self {
            state: Arc::new(Mutex::new(State {
                next_lease_id: 1,
                ..State::default()
            })),
            touched,
            latency: Arc::new(Mutex::new(None)),
            sweeper: CancellationToken::new(),
        };
        store.spawn_sweeper();
        store
    }

    fn spawn_sweeper(&self) {
        let state = Arc::clone(&self.state);
        let touched = self.touched.clone();
        let guard = self.sweeper.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = guard.cancelled() => break,
                    _ = ticker.tick() => {
                        sweep_expired(&state, &touched);
                    }
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Test instrumentation
    // ------------------------------------------------------------------

    /// Delay every subsequent operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Fail the next `count` operations with a transport fault.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().fail_next = count;
    }

    /// Force a lease to expire immediately, cascading like the sweeper.
    pub fn expire_lease(&self, lease: LeaseId) {
        let mut state = self.state.lock();
        expire_one(&mut state, lease, &self.touched);
    }

    /// Stop extending a lease on renewal; it then expires naturally.
    pub fn suspend_lease(&self, lease: LeaseId) {
        if let Some(record) = self.state.lock().leases.get_mut(&lease) {
            record.suspended = true;
        }
    }

    /// Undo [`suspend_lease`](Self::suspend_lease) and restart the clock.
    pub fn resume_lease(&self, lease: LeaseId) {
        if let Some(record) = self.state.lock().leases.get_mut(&lease) {
            record.suspended = false;
            record.deadline = Instant::now() + record.ttl;
        }
    }

    /// Number of live leases, sessions included.
    pub fn lease_count(&self) -> usize {
        self.state.lock().leases.len()
    }

    /// Insert a bare key-value pair not attached to any lease.
    pub fn seed(&self, key: &str, value: &str) {
        let mut state = self.state.lock();
        state.revision += 1;
        let create_revision = state.revision;
        state.keys.insert(
            key.to_string(),
            KeyRecord {
                value: value.to_string(),
                create_revision,
                lease: 0,
            },
        );
        let _ = self.touched.send(key.to_string());
    }

    /// Whether a key currently exists.
    pub fn key_exists(&self, key: &str) -> bool {
        self.state.lock().keys.contains_key(key)
    }

    /// The lease currently holding a key, if any.
    pub fn key_lease(&self, key: &str) -> Option<LeaseId> {
        self.state.lock().keys.get(key).map(|record| record.lease)
    }

    /// Number of live keys under a prefix.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .keys
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .count()
    }

    /// Whether a lease is still live.
    pub fn lease_exists(&self, lease: LeaseId) -> bool {
        self.state.lock().leases.contains_key(&lease)
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    async fn enter(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(Error::Unavailable("injected fault".to_string()));
        }
        Ok(())
    }

    fn grant_locked(state: &mut State, ttl: Duration) -> LeaseId {
        let lease = state.next_lease_id;
        state.next_lease_id += 1;
        state.leases.insert(
            lease,
            LeaseRecord {
                ttl,
                deadline: Instant::now() + ttl,
                keys: HashSet::new(),
                suspended: false,
            },
        );
        lease
    }

    /// Extend a lease's deadline. Returns the granted TTL in seconds, or
    /// `None` when the lease is gone or suspended.
    fn renew(&self, lease: LeaseId) -> Option<i64> {
        let mut state = self.state.lock();
        let record = state.leases.get_mut(&lease)?;
        if record.suspended {
            return None;
        }
        record.deadline = Instant::now() + record.ttl;
        Some(record.ttl.as_secs() as i64)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        // Last clone going away stops the sweeper.
        if Arc::strong_count(&self.state) == 1 {
            self.sweeper.cancel();
        }
    }
}

fn sweep_expired(state: &Arc<Mutex<State>>, touched: &broadcast::Sender<String>) {
    let now = Instant::now();
    let mut state = state.lock();
    let expired: Vec<LeaseId> = state
        .leases
        .iter()
        .filter(|(_, record)| record.deadline <= now)
        .map(|(id, _)| *id)
        .collect();
    for lease in expired {
        expire_one(&mut state, lease, touched);
    }
}

fn expire_one(state: &mut State, lease: LeaseId, touched: &broadcast::Sender<String>) {
    let Some(record) = state.leases.remove(&lease) else {
        return;
    };
    for key in record.keys {
        state.revision += 1;
        state.keys.remove(&key);
        let _ = touched.send(key);
    }
    if let Some(done) = state.sessions.remove(&lease) {
        done.cancel();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.enter().await?;
        Ok(self
            .state
            .lock()
            .keys
            .get(key)
            .map(|record| record.value.clone()))
    }

    async fn grant(&self, ttl: Duration) -> Result<LeaseId> {
        self.enter().await?;
        let mut state = self.state.lock();
        Ok(Self::grant_locked(&mut state, ttl))
    }

    async fn revoke(&self, lease: LeaseId) -> Result<()> {
        self.enter().await?;
        let mut state = self.state.lock();
        if !state.leases.contains_key(&lease) {
            return Err(Error::Unavailable("lease not found".to_string()));
        }
        expire_one(&mut state, lease, &self.touched);
        Ok(())
    }

    async fn time_to_live(&self, lease: LeaseId) -> Result<i64> {
        self.enter().await?;
        let state = self.state.lock();
        match state.leases.get(&lease) {
            Some(record) => {
                let remaining = record.deadline.saturating_duration_since(Instant::now());
                Ok(remaining.as_secs() as i64)
            }
            // Matches the etcd convention for vanished leases.
            None => Ok(-1),
        }
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAlive> {
        self.enter().await?;
        let Some(ttl) = self.renew(lease) else {
            return Err(Error::Unavailable("lease not found".to_string()));
        };

        let (acks, rx) = mpsc::channel(8);
        let guard = CancellationToken::new();
        let store = self.clone();
        let task_guard = guard.clone();
        let period = Duration::from_secs((ttl.max(1) as u64).div_ceil(3));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately; treat it as the grant ack.
            loop {
                tokio::select! {
                    _ = task_guard.cancelled() => break,
                    _ = ticker.tick() => {
                        match store.renew(lease) {
                            Some(remaining) => {
                                if acks.send(remaining).await.is_err() {
                                    break;
                                }
                            }
                            // Lease gone: close the stream.
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(KeepAlive::new(rx, guard))
    }

    async fn put_if_absent(&self, key: &str, value: &str, lease: LeaseId) -> Result<bool> {
        self.enter().await?;
        let mut state = self.state.lock();
        if !state.leases.contains_key(&lease) {
            return Err(Error::Unavailable("lease not found".to_string()));
        }
        if state.keys.contains_key(key) {
            return Ok(false);
        }
        state.revision += 1;
        let create_revision = state.revision;
        state.keys.insert(
            key.to_string(),
            KeyRecord {
                value: value.to_string(),
                create_revision,
                lease,
            },
        );
        if let Some(record) = state.leases.get_mut(&lease) {
            record.keys.insert(key.to_string());
        }
        let _ = self.touched.send(key.to_string());
        Ok(true)
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<PrefixWatch> {
        self.enter().await?;
        let mut feed = self.touched.subscribe();
        let (events, rx) = mpsc::channel(8);
        let guard = CancellationToken::new();
        let task_guard = guard.clone();
        let prefix = prefix.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_guard.cancelled() => break,
                    received = feed.recv() => match received {
                        Ok(key) if key.starts_with(&prefix) => {
                            if events.try_send(()).is_err() && events.is_closed() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        // Dropped events still mean "something changed".
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            let _ = events.try_send(());
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        Ok(PrefixWatch::new(rx, guard))
    }

    async fn open_session(&self, ttl: Duration) -> Result<Session> {
        self.enter().await?;
        let lease = {
            let mut state = self.state.lock();
            Self::grant_locked(&mut state, ttl)
        };
        let done = CancellationToken::new();
        self.state.lock().sessions.insert(lease, done.clone());

        let guard = CancellationToken::new();
        let store = self.clone();
        let task_guard = guard.clone();
        let task_done = done.clone();
        let period = Duration::from_secs((ttl.as_secs().max(1)).div_ceil(3));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = task_guard.cancelled() => break,
                    _ = task_done.cancelled() => break,
                    _ = ticker.tick() => {
                        if store.renew(lease).is_none() {
                            task_done.cancel();
                            break;
                        }
                    }
                }
            }
        });

        Ok(Session::new(lease, done, guard))
    }

    async fn close_session(&self, session: &Session) -> Result<()> {
        session.stop_renewal();
        let mut state = self.state.lock();
        state.sessions.remove(&session.lease_id());
        if state.leases.contains_key(&session.lease_id()) {
            expire_one(&mut state, session.lease_id(), &self.touched);
        }
        Ok(())
    }

    async fn lock(&self, key: &str, session: &Session) -> Result<String> {
        self.enter().await?;
        let mut state = self.state.lock();
        if !state.leases.contains_key(&session.lease_id()) {
            return Err(Error::Unavailable("session lease not found".to_string()));
        }
        let holder_prefix = format!("{}/", key);
        let held = state
            .keys
            .range(holder_prefix.clone()..)
            .take_while(|(candidate, _)| candidate.starts_with(&holder_prefix))
            .next()
            .is_some();
        if held {
            return Err(Error::MutexAlreadyAcquired);
        }

        let owner_key = format!("{}/{:x}", key, session.lease_id());
        state.revision += 1;
        let create_revision = state.revision;
        state.keys.insert(
            owner_key.clone(),
            KeyRecord {
                value: String::new(),
                create_revision,
                lease: session.lease_id(),
            },
        );
        if let Some(record) = state.leases.get_mut(&session.lease_id()) {
            record.keys.insert(owner_key.clone());
        }
        let _ = self.touched.send(owner_key.clone());
        Ok(owner_key)
    }

    async fn unlock(&self, owner_key: &str) -> Result<()> {
        self.enter().await?;
        let mut state = self.state.lock();
        if let Some(record) = state.keys.remove(owner_key) {
            state.revision += 1;
            if let Some(lease) = state.leases.get_mut(&record.lease) {
                lease.keys.remove(owner_key);
            }
            let _ = self.touched.send(owner_key.to_string());
        }
        Ok(())
    }
}
