//! Process-wide shutdown coordination.
//!
//! A [`ProcessContext`] hands out one cancellation token shared by every
//! component of the process and tracks the tasks that must finish before
//! the process exits. Components clone the token, register with the
//! tracker, and react to cancellation; the binary waits on SIGINT/SIGTERM
//! and then drains the tracker.

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Shared shutdown state for one process.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ProcessContext {
    /// Create a fresh process context.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// The process-wide cancellation token.
    ///
    /// Components receive a child of the root token so their own cancels
    /// stay local.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Spawn a tracked task.
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// Trigger process shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// True once shutdown has been triggered.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until every tracked task has finished.
    ///
    /// The tracker is closed first so the wait cannot be extended by tasks
    /// spawned afterwards.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Block until SIGINT/SIGTERM or a programmatic shutdown, then drain.
///
/// Returns after every tracked task has finished.
pub async fn wait_for_shutdown(ctx: &ProcessContext) {
    let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(signal) => Some(signal),
        Err(error) => {
            tracing::warn!(%error, "failed to install SIGTERM handler");
            None
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = async {
            match term.as_mut() {
                Some(signal) => { signal.recv().await; }
                None => std::future::pending::<()>().await,
            }
        } => {}
        _ = ctx.token.cancelled() => {}
    }

    ctx.shutdown();
    ctx.wait_idle().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_cancels_children() {
        let ctx = ProcessContext::new();
        let token = ctx.token();
        assert!(!token.is_cancelled());
        ctx.shutdown();
        assert!(token.is_cancelled());
        assert!(ctx.is_shutting_down());
    }

    #[tokio::test]
    async fn wait_idle_drains_tracked_tasks() {
        let ctx = ProcessContext::new();
        let token = ctx.token();
        ctx.spawn(async move { token.cancelled().await });
        ctx.shutdown();
        ctx.wait_idle().await;
    }
}
