//! Options, defaults and validation.
//!
//! A [`Options`] value describes one coordination client: the service name
//! it registers under, where the store lives, the lease timings, and the
//! key-prefix layout. Construct with [`Options::new`] and chain `with_*`
//! calls; unset endpoint and credential fields fall back to the
//! environment when the service connects.

use crate::core::error::{Error, Result};
use crate::lease::{EventSink, NoopEvents};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding comma-separated store endpoints.
pub const ENV_ADDRESS: &str = "ETCD_ADDRESS";
/// Environment variable holding the store username.
pub const ENV_USER: &str = "ETCD_USER";
/// Environment variable holding the store password.
pub const ENV_PASSWORD: &str = "ETCD_PASSWORD";

/// Client options for a coordination [`Service`](crate::service::Service).
#[derive(Clone)]
pub struct Options {
    /// Name the service registers under. Required.
    pub service_name: String,

    /// Optional scope overriding the service name for scope configuration.
    pub scope: Option<String>,

    /// Timeout applied to unary store calls.
    pub dial_timeout: Duration,

    /// TTL for sessions and pool leases, in whole seconds.
    pub lease_ttl: Duration,

    /// Backoff between session re-creation and pool re-acquisition passes.
    pub retry_interval: Duration,

    /// Store endpoints. Falls back to `ETCD_ADDRESS` when empty.
    pub endpoints: Vec<String>,

    /// Store username. Falls back to `ETCD_USER` when unset.
    pub username: Option<String>,

    /// Store password. Falls back to `ETCD_PASSWORD` when unset.
    pub password: Option<String>,

    /// Prefix for lock keys.
    pub locks_prefix: String,

    /// Prefix for configuration keys.
    pub config_prefix: String,

    /// Prefix for per-host keys.
    pub hosts_prefix: String,

    /// Prefix segment for named mutexes under the locks prefix.
    pub mutexes_prefix: String,

    /// Prefix segment for pool IDs under the locks prefix.
    pub ids_prefix: String,

    /// Sink receiving pool-lease lifecycle events.
    pub events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("service_name", &self.service_name)
            .field("scope", &self.scope)
            .field("dial_timeout", &self.dial_timeout)
            .field("lease_ttl", &self.lease_ttl)
            .field("retry_interval", &self.retry_interval)
            .field("endpoints", &self.endpoints)
            .field("username", &self.username)
            .field("locks_prefix", &self.locks_prefix)
            .field("config_prefix", &self.config_prefix)
            .field("hosts_prefix", &self.hosts_prefix)
            .field("mutexes_prefix", &self.mutexes_prefix)
            .field("ids_prefix", &self.ids_prefix)
            .finish_non_exhaustive()
    }
}

impl Options {
    /// Create options for the given service with default timings and
    /// prefixes.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            scope: None,
            dial_timeout: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(30),
            retry_interval: Duration::from_secs(15),
            endpoints: Vec::new(),
            username: None,
            password: None,
            locks_prefix: "/locks/".to_string(),
            config_prefix: "/configs/".to_string(),
            hosts_prefix: "/hosts/".to_string(),
            mutexes_prefix: "/mutexes/".to_string(),
            ids_prefix: "/ids/".to_string(),
            events: Arc::new(NoopEvents),
        }
    }

    /// Set the configuration scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Set the unary call timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the session and pool-lease TTL.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Set the retry backoff.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the store endpoints from a comma-separated list.
    pub fn with_endpoints(mut self, endpoints: impl AsRef<str>) -> Self {
        self.endpoints = split_endpoints(endpoints.as_ref());
        self
    }

    /// Set store credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the locks prefix.
    pub fn with_locks_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.locks_prefix = prefix.into();
        self
    }

    /// Set the configuration prefix.
    pub fn with_config_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config_prefix = prefix.into();
        self
    }

    /// Set the hosts prefix.
    pub fn with_hosts_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.hosts_prefix = prefix.into();
        self
    }

    /// Set the mutexes prefix segment.
    pub fn with_mutexes_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mutexes_prefix = prefix.into();
        self
    }

    /// Set the pool-ID prefix segment.
    pub fn with_ids_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ids_prefix = prefix.into();
        self
    }

    /// Set the lifecycle event sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Fill unset endpoint and credential fields from the environment.
    pub fn resolve_env(&mut self) {
        if self.endpoints.is_empty() {
            if let Ok(address) = std::env::var(ENV_ADDRESS) {
                self.endpoints = split_endpoints(&address);
            }
        }
        if self.username.is_none() {
            if let Ok(user) = std::env::var(ENV_USER) {
                if !user.is_empty() {
                    self.username = Some(user);
                }
            }
        }
        if self.password.is_none() {
            if let Ok(password) = std::env::var(ENV_PASSWORD) {
                if !password.is_empty() {
                    self.password = Some(password);
                }
            }
        }
    }

    /// Validate option consistency.
    pub fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(Error::ServiceNameNotSpecified);
        }
        // Leases are granted in whole seconds and the supervisor ticks at
        // half the TTL, so sub-second values cannot work.
        if self.lease_ttl < Duration::from_secs(1) || self.retry_interval.is_zero() {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    /// Lease TTL in whole seconds, as granted to the store.
    pub fn lease_ttl_secs(&self) -> i64 {
        self.lease_ttl.as_secs() as i64
    }
}

fn split_endpoints(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::new("billing");
        assert_eq!(options.service_name, "billing");
        assert_eq!(options.dial_timeout, Duration::from_secs(5));
        assert_eq!(options.lease_ttl, Duration::from_secs(30));
        assert_eq!(options.retry_interval, Duration::from_secs(15));
        assert_eq!(options.locks_prefix, "/locks/");
        assert_eq!(options.config_prefix, "/configs/");
        assert_eq!(options.hosts_prefix, "/hosts/");
        assert_eq!(options.mutexes_prefix, "/mutexes/");
        assert_eq!(options.ids_prefix, "/ids/");
        assert!(options.endpoints.is_empty());
    }

    #[test]
    fn endpoints_split_and_trimmed() {
        let options = Options::new("svc").with_endpoints("h1:2379, h2:2379 ,,h3:2379");
        assert_eq!(options.endpoints, vec!["h1:2379", "h2:2379", "h3:2379"]);
    }

    #[test]
    fn empty_service_name_rejected() {
        let options = Options::new("");
        assert!(matches!(
            options.validate(),
            Err(Error::ServiceNameNotSpecified)
        ));
    }
}
