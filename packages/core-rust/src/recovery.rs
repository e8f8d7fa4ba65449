//! Pluggable error recovery: strategies keyed by [`ErrorKind`] and an engine
//! that dispatches to the first strategy claiming an error.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::UserContext;
use crate::error::{AppError, ErrorKind};

/// Outcome of one recovery attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub result: Option<Value>,
    pub fallback: Option<Value>,
}

impl RecoveryResult {
    #[must_use]
    pub fn recovered(result: impl Into<Value>) -> Self {
        Self {
            success: true,
            result: Some(result.into()),
            fallback: None,
        }
    }

    #[must_use]
    pub fn failed_with_fallback(fallback: Option<Value>) -> Self {
        Self {
            success: false,
            result: None,
            fallback,
        }
    }

    /// No strategy claimed the error.
    #[must_use]
    pub fn unrecovered() -> Self {
        Self::failed_with_fallback(None)
    }
}

/// Remediation for one class of errors.
pub trait RecoveryStrategy: Send + Sync {
    /// Short name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    /// Returns `true` if this strategy handles `error`.
    fn can_recover(&self, error: &AppError, context: &UserContext) -> bool;

    /// Attempts remediation. Only called when [`Self::can_recover`] is `true`.
    fn attempt_recovery(&self, error: &AppError, context: &UserContext) -> RecoveryResult;

    /// Degraded value offered when remediation fails.
    fn get_fallback(&self, error: &AppError, context: &UserContext) -> Option<Value>;
}

// ---------------------------------------------------------------------------
// DatabaseRecoveryStrategy
// ---------------------------------------------------------------------------

/// Handles transient database failures with a short retry backoff.
#[derive(Debug, Clone)]
pub struct DatabaseRecoveryStrategy {
    backoff: Duration,
}

impl DatabaseRecoveryStrategy {
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

    #[must_use]
    pub fn new() -> Self {
        Self::with_backoff(Self::DEFAULT_BACKOFF)
    }

    #[must_use]
    pub fn with_backoff(backoff: Duration) -> Self {
        Self { backoff }
    }
}

impl Default for DatabaseRecoveryStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryStrategy for DatabaseRecoveryStrategy {
    fn name(&self) -> &'static str {
        "database"
    }

    fn can_recover(&self, error: &AppError, _context: &UserContext) -> bool {
        *error.kind() == ErrorKind::Operational
    }

    fn attempt_recovery(&self, error: &AppError, _context: &UserContext) -> RecoveryResult {
        debug!(backoff_ms = self.backoff.as_millis(), error = %error, "retrying after backoff");
        std::thread::sleep(self.backoff);
        RecoveryResult::recovered("reconnected")
    }

    fn get_fallback(&self, _error: &AppError, _context: &UserContext) -> Option<Value> {
        Some(Value::from("degraded_mode"))
    }
}

// ---------------------------------------------------------------------------
// AuthenticationRecoveryStrategy
// ---------------------------------------------------------------------------

/// Re-validates the session when the user is already known, else falls back to guest.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticationRecoveryStrategy;

impl RecoveryStrategy for AuthenticationRecoveryStrategy {
    fn name(&self) -> &'static str {
        "authentication"
    }

    fn can_recover(&self, error: &AppError, _context: &UserContext) -> bool {
        *error.kind() == ErrorKind::Authentication
    }

    fn attempt_recovery(&self, error: &AppError, context: &UserContext) -> RecoveryResult {
        if context.is_authenticated() {
            RecoveryResult::recovered("session_revalidated")
        } else {
            RecoveryResult::failed_with_fallback(self.get_fallback(error, context))
        }
    }

    fn get_fallback(&self, _error: &AppError, _context: &UserContext) -> Option<Value> {
        Some(Value::from("guest"))
    }
}

// ---------------------------------------------------------------------------
// ValidationRecoveryStrategy
// ---------------------------------------------------------------------------

/// Validation errors are always recoverable by falling back to sanitized defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationRecoveryStrategy;

impl RecoveryStrategy for ValidationRecoveryStrategy {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn can_recover(&self, error: &AppError, _context: &UserContext) -> bool {
        *error.kind() == ErrorKind::Validation
    }

    fn attempt_recovery(&self, _error: &AppError, _context: &UserContext) -> RecoveryResult {
        RecoveryResult::recovered("validated")
    }

    fn get_fallback(&self, _error: &AppError, _context: &UserContext) -> Option<Value> {
        Some(Value::from("default_values"))
    }
}

// ---------------------------------------------------------------------------
// RecoveryEngine
// ---------------------------------------------------------------------------

/// Ordered chain of strategies. The first strategy claiming an error decides
/// the outcome; later strategies are never consulted for that error.
#[derive(Default)]
pub struct RecoveryEngine {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl RecoveryEngine {
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn RecoveryStrategy>>) -> Self {
        Self { strategies }
    }

    /// Database, authentication, validation, in that order.
    #[must_use]
    pub fn with_default_strategies() -> Self {
        Self::new(vec![
            Box::new(DatabaseRecoveryStrategy::new()),
            Box::new(AuthenticationRecoveryStrategy),
            Box::new(ValidationRecoveryStrategy),
        ])
    }

    /// Appends a strategy after all existing ones.
    pub fn register(&mut self, strategy: Box<dyn RecoveryStrategy>) {
        self.strategies.push(strategy);
    }

    #[must_use]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Runs the first matching strategy. Never panics and never returns an error.
    ///
    /// A strategy whose `can_recover` panics is skipped as if it had declined.
    pub fn attempt_recovery(&self, error: &AppError, context: &UserContext) -> RecoveryResult {
        let Some(strategy) = self.strategies.iter().find(|s| {
            catch_unwind(AssertUnwindSafe(|| s.can_recover(error, context))).unwrap_or_else(|_| {
                warn!(strategy = s.name(), "recovery strategy panicked in can_recover");
                false
            })
        }) else {
            debug!(
                correlation_id = %context.correlation_id,
                kind = %error.kind(),
                "no recovery strategy for error"
            );
            return RecoveryResult::unrecovered();
        };

        let fallback = || {
            catch_unwind(AssertUnwindSafe(|| strategy.get_fallback(error, context)))
                .unwrap_or_else(|_| {
                    warn!(strategy = strategy.name(), "recovery strategy panicked in get_fallback");
                    None
                })
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| strategy.attempt_recovery(error, context)));
        let result = match outcome {
            Ok(result) if result.success => result,
            Ok(_) => RecoveryResult::failed_with_fallback(fallback()),
            Err(_) => {
                warn!(strategy = strategy.name(), "recovery strategy panicked");
                RecoveryResult::failed_with_fallback(fallback())
            }
        };

        metrics::counter!(
            "opsguard_recovery_attempts_total",
            "strategy" => strategy.name(),
            "outcome" => if result.success { "recovered" } else { "failed" }
        )
        .increment(1);

        debug!(
            correlation_id = %context.correlation_id,
            strategy = strategy.name(),
            success = result.success,
            "recovery attempted"
        );
        result
    }
}

impl std::fmt::Debug for RecoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryEngine")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}
