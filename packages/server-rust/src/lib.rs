//! opsguard server: graceful shutdown orchestration, correlation middleware,
//! and diagnostics over an axum HTTP surface.

pub mod network;
pub mod observability;
pub mod shutdown;

pub use network::{NetworkModule, ServerConfig};
pub use observability::{CorrelationLogger, ErrorAnalyticsEngine, RequestLifecycleTracker};
pub use shutdown::{GracefulShutdownManager, ShutdownGuard};
