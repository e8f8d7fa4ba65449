//! Diagnostics: request lifecycle trail, error analytics, correlated error
//! logging, and tracing subscriber setup.

pub mod analytics;
pub mod lifecycle;
pub mod logger;
pub mod subscriber;

pub use analytics::{ErrorAnalyticsEngine, ErrorInsights, SystemHealth};
pub use lifecycle::{LifecycleEvent, RequestLifecycleTracker};
pub use logger::{CorrelationLogEntry, CorrelationLogger};
pub use subscriber::{init_tracing, LogFormat};
