//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tether::store::MemoryStore;
use tether::{EventSink, LeaseEvent, Options, Service};

/// Options with timings short enough for virtual-clock tests:
/// dial 1s, lease TTL 4s (so the supervisor ticks every 2s), retry 2s.
pub fn test_options(service_name: &str) -> Options {
    Options::new(service_name)
        .with_dial_timeout(Duration::from_secs(1))
        .with_lease_ttl(Duration::from_secs(4))
        .with_retry_interval(Duration::from_secs(2))
}

/// Open a service over an in-memory store with [`test_options`].
pub async fn open_service(store: &MemoryStore, service_name: &str) -> Service {
    Service::with_store(Arc::new(store.clone()), test_options(service_name))
        .await
        .expect("service open failed")
}

/// Open a service with a caller-tweaked options value.
pub async fn open_service_with(store: &MemoryStore, options: Options) -> Service {
    Service::with_store(Arc::new(store.clone()), options)
        .await
        .expect("service open failed")
}

/// Event sink recording every lifecycle notification.
#[derive(Clone, Default)]
pub struct RecordingEvents {
    log: Arc<Mutex<Vec<(LeaseEvent, String)>>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events observed so far.
    pub fn events(&self) -> Vec<(LeaseEvent, String)> {
        self.log.lock().clone()
    }

    /// Kinds observed so far, in emission order.
    pub fn kinds(&self) -> Vec<LeaseEvent> {
        self.log.lock().iter().map(|(kind, _)| *kind).collect()
    }

    pub fn contains(&self, kind: LeaseEvent) -> bool {
        self.log.lock().iter().any(|(k, _)| *k == kind)
    }
}

impl EventSink for RecordingEvents {
    fn on_lease_event(&self, event: LeaseEvent, member: &str) {
        self.log.lock().push((event, member.to_string()));
    }
}

/// Poll `condition` until it holds or `max` virtual time elapses.
pub async fn wait_until(max: Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + max;
    loop {
        if condition() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {max:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
