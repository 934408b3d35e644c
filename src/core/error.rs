//! Error kinds.
//!
//! Tether defines one error enum for the whole toolkit. Construction-time
//! failures surface to the caller; once a pool lease is under supervision,
//! transient store errors are swallowed and retried, and only lifecycle
//! outcomes reach the event sink.

use thiserror::Error;

/// Common Tether error conditions.
#[derive(Debug, Error)]
pub enum Error {
    /// No service name was configured.
    #[error("service name is not specified")]
    ServiceNameNotSpecified,

    /// No endpoints configured and `ETCD_ADDRESS` is empty.
    #[error("wrong etcd address")]
    WrongEtcdAddress,

    /// A named mutex is already held, locally or by another replica.
    #[error("mutex already acquired")]
    MutexAlreadyAcquired,

    /// The store did not answer within the configured timeout.
    #[error("etcd timeout")]
    EtcdTimeout,

    /// The configuration target is not a struct or exposes no usable fields.
    #[error("invalid config structure")]
    InvalidConfig,

    /// A host value was requested for a key that holds nothing.
    #[error("empty value")]
    EmptyValue,

    /// Every member of the pool is already leased.
    #[error("no available IDs")]
    NoAvailableIds,

    /// The service currently has no live session.
    #[error("session not available")]
    SessionNotAvailable,

    /// A range spec failed to parse.
    #[error("invalid range format")]
    InvalidRange,

    /// A range spec parsed to zero members.
    #[error("empty range")]
    EmptyRange,

    /// Hyphenated IPv6 ranges cannot be enumerated.
    #[error("IPv6 range not supported, use comma-separated format")]
    Ipv6RangeUnsupported,

    /// The ambient context was cancelled while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// Transport error from the etcd backend, forwarded unchanged.
    #[error(transparent)]
    Etcd(#[from] etcd_client::Error),

    /// The store is unreachable or refused the operation.
    ///
    /// Produced by non-etcd backends; the message carries the native cause.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Check if this error is a store-side timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::EtcdTimeout)
    }

    /// Check if this error means the pool had no free member.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::NoAvailableIds)
    }

    /// Check if this error came from the store transport rather than from
    /// the toolkit's own validation.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Etcd(_) | Self::Unavailable(_) | Self::EtcdTimeout)
    }
}

/// Result type using the Tether error.
pub type Result<T> = std::result::Result<T, Error>;
