//! Health, liveness, and readiness endpoint handlers.
//!
//! These handlers expose shutdown state to orchestrators and load balancers.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;

/// Window over which `/health` reports failed requests.
pub const HEALTH_ERROR_WINDOW: Duration = Duration::from_secs(300);

/// Returns detailed health information as JSON.
///
/// Always returns 200 -- the `state` field in the response body is the
/// shutdown phase (`running`, `shutting_down`, `completed`). `system_health`
/// turns `degraded` while failed requests fall inside [`HEALTH_ERROR_WINDOW`].
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let insights = state.analytics.generate_error_insights(HEALTH_ERROR_WINDOW);
    Json(json!({
        "state": state.shutdown.phase().as_str(),
        "shutdown_initiated": state.shutdown.is_shutdown_initiated(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "lifecycle_events": state.tracker.len(),
        "system_health": insights.system_health,
        "recent_errors": insights.error_trends.total,
    }))
}

/// Liveness check -- always returns 200 OK while the process is up.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness check -- 200 until shutdown starts, 503 afterwards, so no new
/// traffic is routed to a process that is tearing down.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.is_shutdown_initiated() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}
