//! etcd backend.
//!
//! Wraps the `etcd-client` crate behind the [`Store`](super::Store) trait.
//! Unary calls run under the configured dial timeout; expiry maps to the
//! timeout error kind, other transport errors are forwarded unchanged.
//! Sessions and keep-alive handles actively send renewal requests at a
//! third of the lease TTL, because the etcd keep-alive channel is
//! client-driven.

use crate::core::error::{Error, Result};
use crate::store::{KeepAlive, LeaseId, PrefixWatch, Session, Store};
use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, PutOptions, Txn, TxnOp, WatchOptions,
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Store backend over an etcd cluster.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    timeout: Duration,
}

impl EtcdStore {
    /// Connect to the given endpoints.
    pub async fn connect(
        endpoints: &[String],
        username: Option<&str>,
        password: Option<&str>,
        dial_timeout: Duration,
    ) -> Result<Self> {
        let mut options = ConnectOptions::new().with_connect_timeout(dial_timeout);
        if let (Some(username), Some(password)) = (username, password) {
            options = options.with_user(username, password);
        }

        let client = tokio::time::timeout(dial_timeout, Client::connect(endpoints, Some(options)))
            .await
            .map_err(|_| Error::EtcdTimeout)?
            .map_err(Error::Etcd)?;

        Ok(Self {
            client,
            timeout: dial_timeout,
        })
    }

    /// Run a unary call under the dial timeout.
    async fn unary<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, etcd_client::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => Err(Error::Etcd(error)),
            Err(_) => Err(Error::EtcdTimeout),
        }
    }

    fn renewal_period(ttl: i64) -> Duration {
        Duration::from_secs((ttl.max(1) as u64).div_ceil(3))
    }
}

#[async_trait]
impl Store for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut client = self.client.clone();
        let response = self.unary(client.get(key, None)).await?;
        Ok(response
            .kvs()
            .first()
            .map(|kv| String::from_utf8_lossy(kv.value()).into_owned()))
    }

    async fn grant(&self, ttl: Duration) -> Result<LeaseId> {
        let mut client = self.client.clone();
        let response = self
            .unary(client.lease_grant(ttl.as_secs() as i64, None))
            .await?;
        Ok(response.id())
    }

    async fn revoke(&self, lease: LeaseId) -> Result<()> {
        let mut client = self.client.clone();
        self.unary(client.lease_revoke(lease)).await?;
        Ok(())
    }

    async fn time_to_live(&self, lease: LeaseId) -> Result<i64> {
        let mut client = self.client.clone();
        let response = self.unary(client.lease_time_to_live(lease, None)).await?;
        Ok(response.ttl())
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAlive> {
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = self.unary(client.lease_keep_alive(lease)).await?;

        let (acks, rx) = mpsc::channel(8);
        let guard = CancellationToken::new();
        let task_guard = guard.clone();
        tokio::spawn(async move {
            let mut period = Duration::from_secs(1);
            loop {
                if keeper.keep_alive().await.is_err() {
                    break;
                }
                match stream.message().await {
                    Ok(Some(response)) => {
                        let remaining = response.ttl();
                        if remaining <= 0 {
                            debug!(lease, "keep-alive acknowledged an expired lease");
                            break;
                        }
                        if acks.send(remaining).await.is_err() {
                            break;
                        }
                        period = EtcdStore::renewal_period(remaining);
                    }
                    Ok(None) => break,
                    Err(error) => {
                        debug!(lease, %error, "keep-alive stream error");
                        break;
                    }
                }
                tokio::select! {
                    _ = task_guard.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
        });

        Ok(KeepAlive::new(rx, guard))
    }

    async fn put_if_absent(&self, key: &str, value: &str, lease: LeaseId) -> Result<bool> {
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key,
                value,
                Some(PutOptions::new().with_lease(lease)),
            )]);
        let mut client = self.client.clone();
        let response = self.unary(client.txn(txn)).await?;
        Ok(response.succeeded())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<PrefixWatch> {
        let mut client = self.client.clone();
        let (watcher, mut stream) = self
            .unary(client.watch(prefix, Some(WatchOptions::new().with_prefix())))
            .await?;

        let (events, rx) = mpsc::channel(8);
        let guard = CancellationToken::new();
        let task_guard = guard.clone();
        tokio::spawn(async move {
            // Keeps the watch registered until the handle goes away.
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = task_guard.cancelled() => break,
                    message = stream.message() => match message {
                        Ok(Some(response)) => {
                            if response.canceled() {
                                break;
                            }
                            if !response.events().is_empty()
                                && events.try_send(()).is_err()
                                && events.is_closed()
                            {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(error) => {
                            debug!(%error, "watch stream error");
                            break;
                        }
                    },
                }
            }
        });

        Ok(PrefixWatch::new(rx, guard))
    }

    async fn open_session(&self, ttl: Duration) -> Result<Session> {
        let lease = self.grant(ttl).await?;
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = match self.unary(client.lease_keep_alive(lease)).await {
            Ok(pair) => pair,
            Err(error) => {
                let _ = self.revoke(lease).await;
                return Err(error);
            }
        };

        let done = CancellationToken::new();
        let guard = CancellationToken::new();
        let task_done = done.clone();
        let task_guard = guard.clone();
        let period = Self::renewal_period(ttl.as_secs() as i64);
        tokio::spawn(async move {
            loop {
                if keeper.keep_alive().await.is_err() {
                    task_done.cancel();
                    break;
                }
                match stream.message().await {
                    Ok(Some(response)) if response.ttl() > 0 => {}
                    _ => {
                        warn!(lease, "session lease lost");
                        task_done.cancel();
                        break;
                    }
                }
                tokio::select! {
                    _ = task_guard.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
        });

        Ok(Session::new(lease, done, guard))
    }

    async fn close_session(&self, session: &Session) -> Result<()> {
        session.stop_renewal();
        let _ = self.revoke(session.lease_id()).await;
        Ok(())
    }

    async fn lock(&self, key: &str, session: &Session) -> Result<String> {
        // Try-once, never queued: one transaction demands that no holder
        // key exists under the mutex name, then binds our owner key to the
        // session's lease. A held mutex fails the compare immediately.
        let holder_prefix = format!("{}/", key);
        let owner_key = format!("{}/{:x}", key, session.lease_id());
        let txn = Txn::new()
            .when(vec![
                Compare::create_revision(holder_prefix, CompareOp::Equal, 0).with_prefix(),
            ])
            .and_then(vec![TxnOp::put(
                owner_key.as_str(),
                "",
                Some(PutOptions::new().with_lease(session.lease_id())),
            )]);

        let mut client = self.client.clone();
        let response = self.unary(client.txn(txn)).await?;
        if !response.succeeded() {
            return Err(Error::MutexAlreadyAcquired);
        }
        Ok(owner_key)
    }

    async fn unlock(&self, owner_key: &str) -> Result<()> {
        let mut client = self.client.clone();
        self.unary(client.delete(owner_key, None)).await?;
        Ok(())
    }
}
