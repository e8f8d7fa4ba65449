//! Graceful shutdown: resource registry, cleanup sequence, signal handling.

pub mod guard;
pub mod manager;
pub mod resource;
pub mod signals;

pub use guard::{shutdown_handler, ShutdownGuard, CONTEXT_EXIT_REASON};
pub use manager::{
    global, init_global, CleanupOutcome, GracefulShutdownManager, RegisteredResources,
    ShutdownContext, ShutdownPhase, ShutdownStatus, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use resource::{Closeable, Teardown};
pub use signals::{install_signal_handlers, spawn_signal_listener, wait_for_termination, TerminationSignal};
