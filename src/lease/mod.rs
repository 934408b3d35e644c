//! Exclusive pool-member leases.
//!
//! A [`PoolLease`] races the other replicas of a service for one member of
//! a [`Range`]: each member maps to a store key, and whoever creates the
//! key under a fresh lease owns the member. After acquisition a supervisor
//! task keeps the claim alive and classifies trouble precisely:
//!
//! - the keep-alive stream broke but the server still honours the lease -
//!   reattach a stream at the next half-TTL tick, nothing observable
//!   happens;
//! - the server expired the lease - emit [`LeaseEvent::Expired`] and try
//!   to re-bind the same member key, which only works while nobody else
//!   has bound it;
//! - another replica bound it first - emit [`LeaseEvent::TakenOver`] and
//!   end supervision.
//!
//! Separating "stream broke" from "lease gone" is what keeps a flaky
//! connection from forfeiting the member: a lease with half its TTL left
//! survives a reconnect without ever being contested.

pub mod events;

pub use events::{EventSink, LeaseEvent, NoopEvents};

use crate::core::config::Options;
use crate::core::error::{Error, Result};
use crate::core::hostname::hostname;
use crate::range::{Range, RangeKind};
use crate::service::Service;
use crate::store::{KeepAlive, LeaseId, Store, LOCKED_VALUE};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// An exclusive lease over one member of a resource pool.
pub struct PoolLease {
    store: Arc<dyn Store>,
    options: Arc<Options>,
    range: Range,
    app_ctx: CancellationToken,
    stopper: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
    value: Option<String>,
}

impl PoolLease {
    /// Prepare a lease over `range`. No store traffic happens here.
    ///
    /// `app_ctx` bounds background work during process shutdown: reacquire
    /// attempts and the final revoke give up once it fires.
    pub fn new(range: Range, service: &Service, app_ctx: CancellationToken) -> Self {
        Self {
            store: service.store(),
            options: service.shared_options(),
            range,
            app_ctx,
            stopper: CancellationToken::new(),
            supervisor: None,
            value: None,
        }
    }

    /// The member this lease holds, once [`obtain`](Self::obtain) has
    /// succeeded.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Run one acquisition pass over the pool.
    ///
    /// Grants a fresh lease, walks the members in random order, and issues
    /// one create-revision transaction per member until one lands. On
    /// success the keep-alive stream and the supervisor are running and the
    /// member key is committed before this returns. When every member is
    /// taken the unused lease is revoked and `NoAvailableIds` comes back;
    /// transport errors abort the pass unchanged.
    pub async fn obtain(&mut self) -> Result<String> {
        if let (Some(value), Some(supervisor)) = (&self.value, &self.supervisor) {
            // Already held and supervised.
            if !supervisor.is_finished() {
                return Ok(value.clone());
            }
        }

        let lease_id = self.store.grant(self.options.lease_ttl).await?;
        let prefix = self.key_prefix();

        let mut members: Vec<String> = self.range.members().to_vec();
        members.shuffle(&mut rand::thread_rng());

        for member in members {
            let lease_key = format!("{}{}", prefix, member);
            if !self
                .store
                .put_if_absent(&lease_key, LOCKED_VALUE, lease_id)
                .await?
            {
                continue;
            }

            let keep_alive = self.store.keep_alive(lease_id).await?;
            let keepalive_cancel = keep_alive.cancel_token();
            let (breaker_tx, breaker_rx) = mpsc::channel(1);
            spawn_consumer(keep_alive, breaker_tx.clone());

            let supervisor = Supervisor {
                store: Arc::clone(&self.store),
                options: Arc::clone(&self.options),
                member: member.clone(),
                lease_id,
                lease_key,
                keepalive_cancel: Some(keepalive_cancel),
                breaker_tx,
                breaker_rx,
                stopper: self.stopper.clone(),
                app_ctx: self.app_ctx.clone(),
            };
            self.supervisor = Some(tokio::spawn(supervisor.run()));
            self.value = Some(member.clone());

            info!(member = %member, lease_id, "pool member acquired");
            return Ok(member);
        }

        let _ = self.store.revoke(lease_id).await;
        Err(Error::NoAvailableIds)
    }

    /// Acquire a member, waiting for one to free up if the pool is full.
    ///
    /// Retries the acquisition pass whenever the pool prefix changes or the
    /// retry interval elapses, whichever comes first. Returns `Cancelled`
    /// once the ambient context fires; any error other than pool
    /// exhaustion is returned immediately.
    pub async fn wait(&mut self) -> Result<String> {
        loop {
            match self.obtain().await {
                Ok(member) => return Ok(member),
                Err(Error::NoAvailableIds) => {}
                Err(error) => return Err(error),
            }

            let mut watch = self.store.watch_prefix(&self.key_prefix()).await?;
            tokio::select! {
                _ = watch.changed() => {}
                _ = tokio::time::sleep(self.options.retry_interval) => {}
                _ = self.app_ctx.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    /// Stop supervision and release the member.
    ///
    /// Waits for the supervisor to exit; while the lease is still believed
    /// valid it is revoked best-effort so the member frees up immediately
    /// instead of after a TTL.
    pub async fn close(&mut self) {
        self.stopper.cancel();
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.await;
        }
    }

    fn key_prefix(&self) -> String {
        match self.range.kind() {
            RangeKind::Id => format!(
                "{}{}{}",
                self.options.locks_prefix, self.options.service_name, self.options.ids_prefix
            ),
            RangeKind::Ipv4 => format!(
                "{}{}{}{}/",
                self.options.locks_prefix,
                self.options.service_name,
                self.options.hosts_prefix,
                hostname()
            ),
        }
    }
}

/// Drain one keep-alive stream; fire the breaker when it closes.
fn spawn_consumer(mut keep_alive: KeepAlive, breaker: mpsc::Sender<()>) {
    tokio::spawn(async move {
        while let Some(remaining) = keep_alive.recv().await {
            trace!(remaining, "keep-alive renewed");
        }
        // Coalesced: a full breaker already carries the news.
        let _ = breaker.try_send(());
    });
}

enum Reacquire {
    Success,
    Failure,
    TakenOver,
}

/// Background supervisor for one held pool member.
struct Supervisor {
    store: Arc<dyn Store>,
    options: Arc<Options>,
    member: String,
    lease_id: LeaseId,
    lease_key: String,
    keepalive_cancel: Option<CancellationToken>,
    breaker_tx: mpsc::Sender<()>,
    breaker_rx: mpsc::Receiver<()>,
    stopper: CancellationToken,
    app_ctx: CancellationToken,
}

impl Supervisor {
    async fn run(mut self) {
        let period = self.options.lease_ttl / 2;
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // `lease_alive`: the server is believed to still honour the lease.
        // `keepalive_running`: a local stream is draining renewals.
        // Both start true: obtain() only spawns us after committing the key
        // and opening the stream.
        let mut lease_alive = true;
        let mut keepalive_running = true;

        'supervise: loop {
            tokio::select! {
                _ = self.stopper.cancelled() => break 'supervise,

                Some(()) = self.breaker_rx.recv() => {
                    if !keepalive_running {
                        continue;
                    }
                    keepalive_running = false;
                    if let Some(cancel) = self.keepalive_cancel.take() {
                        cancel.cancel();
                    }
                    warn!(member = %self.member, "keep-alive stream stopped");
                }

                _ = ticker.tick() => {
                    if keepalive_running {
                        // Healthy.
                        continue;
                    }

                    if lease_alive {
                        let remaining = match tokio::time::timeout(
                            self.options.dial_timeout,
                            self.store.time_to_live(self.lease_id),
                        )
                        .await
                        {
                            Ok(Ok(remaining)) => remaining,
                            Ok(Err(error)) => {
                                debug!(member = %self.member, %error, "lease TTL probe failed");
                                continue;
                            }
                            Err(_) => {
                                debug!(member = %self.member, "lease TTL probe timed out");
                                continue;
                            }
                        };

                        if remaining > 0 {
                            // Lease survived the stream loss; reattach.
                            match self.store.keep_alive(self.lease_id).await {
                                Ok(keep_alive) => {
                                    self.keepalive_cancel = Some(keep_alive.cancel_token());
                                    spawn_consumer(keep_alive, self.breaker_tx.clone());
                                    keepalive_running = true;
                                    info!(member = %self.member, "keep-alive re-established");
                                }
                                Err(error) => {
                                    debug!(
                                        member = %self.member, %error,
                                        "keep-alive restart failed",
                                    );
                                }
                            }
                            continue;
                        }

                        info!(member = %self.member, "lease expired");
                        self.options
                            .events
                            .on_lease_event(LeaseEvent::Expired, &self.member);
                        lease_alive = false;
                    }

                    match self.reacquire().await {
                        Reacquire::Success => {
                            info!(member = %self.member, lease_id = self.lease_id, "lease reacquired");
                            self.options
                                .events
                                .on_lease_event(LeaseEvent::Reacquired, &self.member);
                            lease_alive = true;
                            keepalive_running = true;
                        }
                        Reacquire::Failure => {}
                        Reacquire::TakenOver => {
                            warn!(member = %self.member, "pool member taken over by another replica");
                            self.options
                                .events
                                .on_lease_event(LeaseEvent::TakenOver, &self.member);
                            break 'supervise;
                        }
                    }
                }
            }
        }

        if let Some(cancel) = self.keepalive_cancel.take() {
            cancel.cancel();
        }
        if lease_alive {
            tokio::select! {
                _ = self.app_ctx.cancelled() => {}
                _ = tokio::time::timeout(
                    self.options.dial_timeout,
                    self.store.revoke(self.lease_id),
                ) => {}
            }
        }
    }

    /// Try to re-bind the member key under a fresh lease.
    ///
    /// The transaction demands the key be absent, which holds exactly when
    /// the previous holder's lease took the key with it and nobody has
    /// re-bound it since.
    async fn reacquire(&mut self) -> Reacquire {
        let outcome = tokio::select! {
            _ = self.app_ctx.cancelled() => return Reacquire::Failure,
            outcome = tokio::time::timeout(self.options.dial_timeout, async {
                let lease_id = self.store.grant(self.options.lease_ttl).await?;
                let bound = self
                    .store
                    .put_if_absent(&self.lease_key, LOCKED_VALUE, lease_id)
                    .await?;
                Ok::<(LeaseId, bool), Error>((lease_id, bound))
            }) => outcome,
        };

        let (lease_id, bound) = match outcome {
            Ok(Ok(pair)) => pair,
            Ok(Err(error)) => {
                debug!(member = %self.member, %error, "reacquire attempt failed");
                return Reacquire::Failure;
            }
            Err(_) => {
                debug!(member = %self.member, "reacquire attempt timed out");
                return Reacquire::Failure;
            }
        };

        if !bound {
            return Reacquire::TakenOver;
        }

        match self.store.keep_alive(lease_id).await {
            Ok(keep_alive) => {
                self.keepalive_cancel = Some(keep_alive.cancel_token());
                spawn_consumer(keep_alive, self.breaker_tx.clone());
                self.lease_id = lease_id;
                Reacquire::Success
            }
            Err(error) => {
                debug!(member = %self.member, %error, "keep-alive bootstrap failed after reacquire");
                Reacquire::Failure
            }
        }
    }
}
