//! Structured error logging that ties an error to its correlation context
//! and recovery outcome.
//!
//! Entries are built from [`UserContext::sanitize_for_logging`] fields only,
//! so user preferences can never appear in a log record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use opsguard_core::{AppError, RecoveryResult, UserContext};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use super::analytics::ErrorAnalyticsEngine;

/// Minimal trail of who was affected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserJourney {
    pub user_id: Option<String>,
    pub session_id: String,
    pub request_id: String,
}

/// Process state captured when the entry was built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemState {
    pub timestamp: DateTime<Utc>,
    pub thread: Option<String>,
}

/// What recovery did for this error. Empty when recovery was not attempted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryActions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationLogEntry {
    pub correlation_id: String,
    /// Error type names from the logged error down to its root cause.
    pub error_chain: Vec<String>,
    pub message: String,
    pub user_journey: UserJourney,
    pub system_state: SystemState,
    pub recovery_actions: RecoveryActions,
}

impl CorrelationLogEntry {
    /// Mapping form of the entry.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Emits [`CorrelationLogEntry`] records via `tracing`, optionally forwarding
/// them to an [`ErrorAnalyticsEngine`].
#[derive(Debug, Clone, Default)]
pub struct CorrelationLogger {
    analytics: Option<Arc<ErrorAnalyticsEngine>>,
}

impl CorrelationLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_analytics(analytics: Arc<ErrorAnalyticsEngine>) -> Self {
        Self {
            analytics: Some(analytics),
        }
    }

    /// Builds the entry, logs it at error level and returns it.
    pub fn log_error_with_correlation(
        &self,
        err: &AppError,
        context: &UserContext,
        recovery: Option<&RecoveryResult>,
    ) -> CorrelationLogEntry {
        let sanitized = context.sanitize_for_logging();
        let entry = CorrelationLogEntry {
            correlation_id: sanitized.correlation_id,
            error_chain: err.error_chain(),
            message: err.to_string(),
            user_journey: UserJourney {
                user_id: sanitized.user_id,
                session_id: sanitized.session_id,
                request_id: sanitized.request_id,
            },
            system_state: SystemState {
                timestamp: Utc::now(),
                thread: std::thread::current().name().map(str::to_string),
            },
            recovery_actions: RecoveryActions {
                success: recovery.map(|r| r.success),
            },
        };

        error!(
            correlation_id = %entry.correlation_id,
            error_kind = %err.kind(),
            entry = %entry.to_value(),
            "{}",
            entry.message
        );

        if let Some(analytics) = &self.analytics {
            analytics.record_error(err, context, &entry.correlation_id);
            if let Some(result) = recovery {
                analytics.record_recovery(result.success);
            }
        }
        entry
    }
}
