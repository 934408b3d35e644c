//! Tether - service coordination over an etcd-compatible store.
//!
//! Tether lets replicas of a distributed service coordinate through a
//! strongly consistent key-value store with lease-based ephemeral keys.
//! Replicas can take short-lived named locks, load structured configuration
//! from the store, and - centrally - acquire and hold an exclusive lease on
//! one member of a predeclared resource pool (a numeric identifier or an
//! IPv4 address), detecting loss of the lease and recovering without manual
//! intervention.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Callers                                │
//! │    named locks    │   remote configuration   │   pool leases    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Service                                │
//! │      session supervisor │ mutex registry │ config loader        │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Store trait                              │
//! │   leases │ keep-alive │ CAS on create-revision │ prefix watch   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │         etcd backend          │        in-memory backend        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Options, defaults and validation
//! - [`core::error`] - Error kinds
//! - [`core::hostname`] - Hostname lookup and sanitisation
//! - [`core::ident`] - Replica identity and cookie generation
//! - [`core::shutdown`] - Process-wide shutdown coordination
//!
//! ## Pool ranges
//! - [`range`] - ID and IPv4 pool definitions
//!
//! ## Store
//! - [`store`] - The store abstraction and its handle types
//! - [`store::etcd`] - etcd backend
//! - [`store::memory`] - in-process backend for tests and local runs
//!
//! ## Coordination
//! - [`service`] - Session supervisor, mutex registry, config loading
//! - [`lease`] - Exclusive pool-member leases
//!
//! # Key Invariants
//!
//! - A pool member is held by at most one replica at any store-observable
//!   moment.
//! - A successful [`lease::PoolLease::obtain`] returns only after the pool
//!   key is committed under the new lease and keep-alive is established.
//! - While a pool lease is held, either a keep-alive stream is draining or
//!   an expiry event has been (or will be) emitted.
//! - Closing a [`service::Service`] cancels every outstanding mutex release
//!   signal before the session and the store client are torn down.

// Core infrastructure
pub mod core;

// Pool range definitions
pub mod range;

// Store abstraction and backends
pub mod store;

// Session supervisor and mutex registry
pub mod service;

// Pool lease worker
pub mod lease;

// Re-exports for convenience
pub use self::core::config::Options;
pub use self::core::error::{Error, Result};
pub use self::core::{config, error, hostname, ident, shutdown};
pub use lease::{EventSink, LeaseEvent, NoopEvents, PoolLease};
pub use range::{Range, RangeKind};
pub use service::{ConfigKind, RemoteConfig, Service};
