//! HTTP surface: configuration, correlation middleware, health handlers, and
//! the server lifecycle.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;

pub use config::*;
pub use handlers::AppState;
pub use middleware::{
    build_http_layers, request_data_from_headers, ContextMiddleware, CorrelationLayer,
    CorrelationService, CANCELLED_STATUS, CORRELATION_ID_HEADER,
};
pub use module::{NetworkModule, SERVER_STOP_TIMEOUT};
