//! Scope-bound shutdown: cleanup runs when the guard leaves scope,
//! whether the scope exits normally or by unwinding.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use super::manager::GracefulShutdownManager;

/// Reason recorded when a [`ShutdownGuard`] triggers shutdown.
pub const CONTEXT_EXIT_REASON: &str = "context exit";

/// Runs `shutdown("context exit")` on drop.
#[must_use = "shutdown runs as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ShutdownGuard {
    manager: Arc<GracefulShutdownManager>,
}

impl ShutdownGuard {
    pub fn new(manager: Arc<GracefulShutdownManager>) -> Self {
        Self { manager }
    }

    /// Shared handle to the guarded manager.
    #[must_use]
    pub fn manager(&self) -> Arc<GracefulShutdownManager> {
        Arc::clone(&self.manager)
    }
}

impl Deref for ShutdownGuard {
    type Target = GracefulShutdownManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.manager.shutdown(CONTEXT_EXIT_REASON);
    }
}

/// Creates a fresh manager with `timeout` and guards it.
pub fn shutdown_handler(timeout: Duration) -> ShutdownGuard {
    ShutdownGuard::new(Arc::new(GracefulShutdownManager::new(timeout)))
}

impl GracefulShutdownManager {
    /// Guards this manager so it shuts down when the guard is dropped.
    pub fn guard(self: &Arc<Self>) -> ShutdownGuard {
        ShutdownGuard::new(Arc::clone(self))
    }
}
