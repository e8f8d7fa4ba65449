//! HTTP handler definitions for the opsguard server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports the handler functions used by the router.

pub mod health;

pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use crate::observability::{ErrorAnalyticsEngine, RequestLifecycleTracker};
use crate::shutdown::GracefulShutdownManager;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Process shutdown coordinator; readiness follows its phase.
    pub shutdown: Arc<GracefulShutdownManager>,
    /// Request lifecycle trail fed by the correlation middleware.
    pub tracker: Arc<RequestLifecycleTracker>,
    /// Failed requests logged by the correlation middleware.
    pub analytics: Arc<ErrorAnalyticsEngine>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
