//! Session supervisor and mutex registry.
//!
//! A [`Service`] owns one store client and one live session (a
//! backend-renewed lease). Named mutexes and remote configuration hang off
//! that session. A monitor task watches the session's loss signal: when the
//! store declares the lease dead, every outstanding mutex release signal is
//! cancelled, and the session is re-created with backoff until it sticks or
//! the service shuts down.

pub mod settings;

pub use settings::RemoteConfig;

use crate::core::config::Options;
use crate::core::error::{Error, Result};
use crate::core::hostname::hostname;
use crate::core::ident::ReplicaId;
use crate::store::{EtcdStore, LeaseId, Session, Store};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Which configuration tree to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    /// `config_prefix ‖ service_name ‖ "/"`.
    Service,
    /// `config_prefix ‖ scope ‖ "/"`, falling back to the service name.
    Scope,
    /// `hosts_prefix ‖ service_name ‖ "/" ‖ hostname ‖ "/"`.
    Host,
}

/// One held named mutex.
struct MutexRecord {
    owner_key: String,
    released: CancellationToken,
}

struct SharedState {
    session: Option<Arc<Session>>,
    mutexes: HashMap<String, MutexRecord>,
}

/// A coordination client for one service.
pub struct Service {
    store: Arc<dyn Store>,
    options: Arc<Options>,
    state: Arc<Mutex<SharedState>>,
    stopper: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Service {
    /// Connect to the store named in the options and open a session.
    ///
    /// Unset endpoints and credentials fall back to `ETCD_ADDRESS`,
    /// `ETCD_USER` and `ETCD_PASSWORD`.
    pub async fn connect(options: Options) -> Result<Self> {
        let mut options = options;
        options.validate()?;
        options.resolve_env();
        if options.endpoints.is_empty() {
            return Err(Error::WrongEtcdAddress);
        }

        let store = EtcdStore::connect(
            &options.endpoints,
            options.username.as_deref(),
            options.password.as_deref(),
            options.dial_timeout,
        )
        .await?;

        Self::with_store(Arc::new(store), options).await
    }

    /// Open a service over an already-constructed store backend.
    pub async fn with_store(store: Arc<dyn Store>, options: Options) -> Result<Self> {
        options.validate()?;
        let options = Arc::new(options);

        let session = store.open_session(options.lease_ttl).await?;
        let state = Arc::new(Mutex::new(SharedState {
            session: Some(Arc::new(session)),
            mutexes: HashMap::new(),
        }));

        let stopper = CancellationToken::new();
        let monitor = tokio::spawn(monitor_session(
            Arc::clone(&store),
            Arc::clone(&options),
            Arc::clone(&state),
            stopper.clone(),
        ));

        Ok(Self {
            store,
            options,
            state,
            stopper,
            monitor: Mutex::new(Some(monitor)),
        })
    }

    /// The options this service was opened with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    pub(crate) fn shared_options(&self) -> Arc<Options> {
        Arc::clone(&self.options)
    }

    /// Acquire the named mutex, bound to the current session.
    ///
    /// Returns a signal cancelled when the mutex is released locally or the
    /// owning session dies. Fails with `MutexAlreadyAcquired` when the name
    /// is already held - by this service or by any other replica -
    /// `SessionNotAvailable` when no session is live, and `EtcdTimeout`
    /// when the store does not answer within the dial timeout.
    pub async fn acquire_lock(&self, name: &str) -> Result<CancellationToken> {
        let key = self.mutex_key(name);

        let session = {
            let state = self.state.lock();
            let Some(session) = state.session.as_ref() else {
                return Err(Error::SessionNotAvailable);
            };
            if state.mutexes.contains_key(&key) {
                return Err(Error::MutexAlreadyAcquired);
            }
            Arc::clone(session)
        };

        let owner_key = match tokio::time::timeout(
            self.options.dial_timeout,
            self.store.lock(&key, &session),
        )
        .await
        {
            Ok(Ok(owner_key)) => owner_key,
            Ok(Err(error)) => return Err(error),
            Err(_) => return Err(Error::EtcdTimeout),
        };

        let released = CancellationToken::new();
        let signal = released.child_token();
        self.state
            .lock()
            .mutexes
            .insert(key, MutexRecord { owner_key, released });
        Ok(signal)
    }

    /// Release a named mutex.
    ///
    /// Releasing a mutex this service does not hold is a no-op.
    pub async fn release_lock(&self, name: &str) -> Result<()> {
        let key = self.mutex_key(name);

        let owner_key = {
            let state = self.state.lock();
            match state.mutexes.get(&key) {
                Some(record) => record.owner_key.clone(),
                None => return Ok(()),
            }
        };

        match tokio::time::timeout(self.options.dial_timeout, self.store.unlock(&owner_key)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(error)) => return Err(error),
            Err(_) => return Err(Error::EtcdTimeout),
        }

        if let Some(record) = self.state.lock().mutexes.remove(&key) {
            record.released.cancel();
        }
        Ok(())
    }

    /// Load configuration values from the store into `target`.
    ///
    /// Only the fields listed in [`RemoteConfig::TAGS`] participate;
    /// everything else keeps its in-memory value. See [`settings`] for
    /// the coercion rules.
    pub async fn load_config<T>(&self, kind: ConfigKind, target: &mut T) -> Result<()>
    where
        T: RemoteConfig,
    {
        let path = self.config_path(kind);
        settings::load_into(&self.store, self.options.dial_timeout, &path, target).await
    }

    /// Read one per-host value.
    ///
    /// Fails with `EmptyValue` when the key holds nothing.
    pub async fn host_value(&self, key: &str) -> Result<String> {
        let full_key = format!(
            "{}{}/{}/{}",
            self.options.hosts_prefix,
            self.options.service_name,
            hostname(),
            key
        );
        let value = match tokio::time::timeout(self.options.dial_timeout, self.store.get(&full_key))
            .await
        {
            Ok(Ok(value)) => value,
            Ok(Err(error)) => return Err(error),
            Err(_) => return Err(Error::EtcdTimeout),
        };
        value.ok_or(Error::EmptyValue)
    }

    /// Build this replica's identity from a raw slot string.
    ///
    /// Unparseable or negative slots collapse to 0.
    pub fn replica_id(&self, raw_slot: &str) -> ReplicaId {
        let slot = raw_slot.parse::<i64>().ok().filter(|s| *s >= 0).unwrap_or(0);
        ReplicaId::new(self.options.service_name.clone(), slot)
    }

    /// True while the service has a live session.
    pub fn session_available(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// Lease backing the current session, for diagnostics.
    pub fn session_lease_id(&self) -> Option<LeaseId> {
        self.state
            .lock()
            .session
            .as_ref()
            .map(|session| session.lease_id())
    }

    /// Shut the service down.
    ///
    /// Stops the monitor, cancels every outstanding mutex release signal,
    /// and closes the session. The store client goes away with the value.
    pub async fn close(&self) {
        self.stopper.cancel();
        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            let _ = monitor.await;
        }

        let (session, mutexes) = {
            let mut state = self.state.lock();
            (state.session.take(), std::mem::take(&mut state.mutexes))
        };
        for (_, record) in mutexes {
            record.released.cancel();
        }
        if let Some(session) = session {
            let _ = self.store.close_session(&session).await;
        }
    }

    fn mutex_key(&self, name: &str) -> String {
        format!(
            "{}{}{}{}",
            self.options.locks_prefix, self.options.service_name, self.options.mutexes_prefix, name
        )
    }

    fn config_path(&self, kind: ConfigKind) -> String {
        match kind {
            ConfigKind::Service => format!(
                "{}{}/",
                self.options.config_prefix, self.options.service_name
            ),
            ConfigKind::Scope => {
                let scope = self
                    .options
                    .scope
                    .as_deref()
                    .unwrap_or(&self.options.service_name);
                format!("{}{}/", self.options.config_prefix, scope)
            }
            ConfigKind::Host => format!(
                "{}{}/{}/",
                self.options.hosts_prefix,
                self.options.service_name,
                hostname()
            ),
        }
    }
}

/// Watch the live session and rebuild it when the store declares it dead.
async fn monitor_session(
    store: Arc<dyn Store>,
    options: Arc<Options>,
    state: Arc<Mutex<SharedState>>,
    stopper: CancellationToken,
) {
    let mut done = {
        let state = state.lock();
        match state.session.as_ref() {
            Some(session) => session.done(),
            None => return,
        }
    };

    loop {
        tokio::select! {
            _ = stopper.cancelled() => return,
            _ = done.cancelled() => {
                warn!(service = %options.service_name, "store session lost, invalidating held mutexes");

                let (dead, mutexes) = {
                    let mut state = state.lock();
                    (state.session.take(), std::mem::take(&mut state.mutexes))
                };
                if let Some(dead) = dead {
                    let store = Arc::clone(&store);
                    tokio::spawn(async move {
                        let _ = store.close_session(&dead).await;
                    });
                }
                for (_, record) in mutexes {
                    record.released.cancel();
                }

                loop {
                    match store.open_session(options.lease_ttl).await {
                        Ok(session) => {
                            done = session.done();
                            state.lock().session = Some(Arc::new(session));
                            info!(service = %options.service_name, "store session re-established");
                            break;
                        }
                        Err(error) => {
                            debug!(%error, "session re-creation failed, backing off");
                            tokio::select! {
                                _ = stopper.cancelled() => return,
                                _ = tokio::time::sleep(options.retry_interval) => {}
                            }
                        }
                    }
                }
            }
        }
    }
}
