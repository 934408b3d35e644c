//! Pool-lease lifecycle events.

/// What happened to a held pool member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEvent {
    /// The store expired the lease; the member key is gone.
    Expired,
    /// The original holder re-bound the same member under a fresh lease.
    Reacquired,
    /// Another replica bound the member first; supervision has ended.
    TakenOver,
}

impl std::fmt::Display for LeaseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Expired => "lease expired",
            Self::Reacquired => "lease reacquired",
            Self::TakenOver => "lease taken over",
        };
        f.write_str(name)
    }
}

/// Observer for pool-lease lifecycle events.
///
/// Implementations must tolerate concurrent calls from multiple pool
/// leases. Failures belong to the implementation; nothing propagates back
/// into the supervisor.
pub trait EventSink: Send + Sync {
    /// Called once per lifecycle transition with the affected member.
    fn on_lease_event(&self, event: LeaseEvent, member: &str);
}

/// Sink that drops every event.
pub struct NoopEvents;

impl EventSink for NoopEvents {
    fn on_lease_event(&self, _event: LeaseEvent, _member: &str) {}
}
