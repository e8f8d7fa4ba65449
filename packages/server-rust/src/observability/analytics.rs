//! In-memory error aggregation for basic health signals.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use opsguard_core::{AppError, ErrorKind, UserContext};
use parking_lot::Mutex;
use serde::Serialize;

/// Default number of error records retained.
pub const DEFAULT_ANALYTICS_CAPACITY: usize = 10_000;

/// Occurrences of one kind within a window before it counts as a pattern.
pub const PATTERN_THRESHOLD: usize = 3;

/// One recorded error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub error_chain: Vec<String>,
    pub message: String,
    pub correlation_id: String,
    pub user_id: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHealth {
    Good,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorTrends {
    pub total: usize,
    /// Error type name -> count.
    pub by_kind: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedPattern {
    pub kind: String,
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserImpact {
    pub error_count: usize,
    pub affected_users: usize,
}

/// Aggregated view over the errors recorded within a time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInsights {
    pub window_secs: u64,
    pub error_trends: ErrorTrends,
    pub pattern_detection: Vec<DetectedPattern>,
    /// Recovery successes divided by attempts; `1.0` when nothing was attempted.
    pub recovery_effectiveness: f64,
    pub user_impact: UserImpact,
    pub system_health: SystemHealth,
    pub recommendations: Vec<String>,
}

/// Bounded ring of [`ErrorRecord`]s plus recovery counters.
#[derive(Debug)]
pub struct ErrorAnalyticsEngine {
    capacity: usize,
    records: Mutex<VecDeque<ErrorRecord>>,
    recovery_attempts: AtomicU64,
    recovery_successes: AtomicU64,
}

impl ErrorAnalyticsEngine {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
            recovery_attempts: AtomicU64::new(0),
            recovery_successes: AtomicU64::new(0),
        }
    }

    pub fn record_error(&self, error: &AppError, context: &UserContext, correlation_id: &str) {
        let record = ErrorRecord {
            kind: error.kind().clone(),
            error_chain: error.error_chain(),
            message: error.to_string(),
            correlation_id: correlation_id.to_string(),
            user_id: context.user_id.clone(),
            at: Utc::now(),
        };
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Counts one recovery attempt and whether it succeeded.
    pub fn record_recovery(&self, success: bool) {
        self.recovery_attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            self.recovery_successes.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Summarizes errors recorded within the last `window`.
    #[must_use]
    pub fn generate_error_insights(&self, window: Duration) -> ErrorInsights {
        let cutoff = TimeDelta::from_std(window)
            .ok()
            .and_then(|delta| Utc::now().checked_sub_signed(delta));

        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut users = BTreeSet::new();
        let mut total = 0;
        for record in self
            .records
            .lock()
            .iter()
            .filter(|r| cutoff.map_or(true, |cutoff| r.at >= cutoff))
        {
            total += 1;
            *by_kind.entry(record.kind.type_name().to_string()).or_default() += 1;
            if let Some(user) = &record.user_id {
                users.insert(user.clone());
            }
        }

        let pattern_detection: Vec<DetectedPattern> = by_kind
            .iter()
            .filter(|(_, count)| **count >= PATTERN_THRESHOLD)
            .map(|(kind, count)| DetectedPattern {
                kind: kind.clone(),
                occurrences: *count,
            })
            .collect();
        let recommendations = pattern_detection
            .iter()
            .map(|p| recommendation_for(&p.kind))
            .collect();

        ErrorInsights {
            window_secs: window.as_secs(),
            error_trends: ErrorTrends { total, by_kind },
            pattern_detection,
            recovery_effectiveness: self.recovery_effectiveness(),
            user_impact: UserImpact {
                error_count: total,
                affected_users: users.len(),
            },
            system_health: if total == 0 {
                SystemHealth::Good
            } else {
                SystemHealth::Degraded
            },
            recommendations,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn recovery_effectiveness(&self) -> f64 {
        let attempts = self.recovery_attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 1.0;
        }
        self.recovery_successes.load(Ordering::Relaxed) as f64 / attempts as f64
    }
}

impl Default for ErrorAnalyticsEngine {
    fn default() -> Self {
        Self::new(DEFAULT_ANALYTICS_CAPACITY)
    }
}

fn recommendation_for(kind: &str) -> String {
    match kind {
        "OperationalError" => "Check database connectivity and connection pool health".to_string(),
        "AuthenticationError" => "Review session expiry and token refresh handling".to_string(),
        "ValidationError" => "Tighten input validation before submission".to_string(),
        other => format!("Investigate recurring {other} errors"),
    }
}

#[cfg(test)]
mod tests {
    use opsguard_core::{ContextManager, RequestData};

    use super::*;

    fn context(user: Option<&str>) -> UserContext {
        let mut data = RequestData::default();
        data.user_id = user.map(str::to_string);
        let ctx = ContextManager::build_context(data);
        ContextManager::clear_context();
        ctx
    }

    #[test]
    fn empty_engine_reports_good_health() {
        let engine = ErrorAnalyticsEngine::default();
        let insights = engine.generate_error_insights(Duration::from_secs(3600));
        assert_eq!(insights.system_health, SystemHealth::Good);
        assert_eq!(insights.error_trends.total, 0);
        assert_eq!(insights.user_impact.error_count, 0);
        assert!(insights.pattern_detection.is_empty());
        assert!(insights.recommendations.is_empty());
        assert!((insights.recovery_effectiveness - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn recorded_errors_degrade_health_and_count_users() {
        let engine = ErrorAnalyticsEngine::default();
        engine.record_error(&AppError::validation("bad"), &context(Some("alice")), "c1");
        engine.record_error(&AppError::validation("bad"), &context(Some("bob")), "c2");
        engine.record_error(&AppError::operational("db"), &context(Some("alice")), "c3");
        engine.record_error(&AppError::operational("db"), &context(None), "c4");

        let insights = engine.generate_error_insights(Duration::from_secs(60));
        assert_eq!(insights.system_health, SystemHealth::Degraded);
        assert_eq!(insights.error_trends.total, 4);
        assert_eq!(insights.error_trends.by_kind["ValidationError"], 2);
        assert_eq!(insights.user_impact.error_count, 4);
        assert_eq!(insights.user_impact.affected_users, 2);
    }

    #[test]
    fn repeated_kind_is_detected_as_pattern() {
        let engine = ErrorAnalyticsEngine::default();
        for i in 0..3 {
            engine.record_error(&AppError::operational("timeout"), &context(None), &format!("c{i}"));
        }
        engine.record_error(&AppError::validation("bad"), &context(None), "v");

        let insights = engine.generate_error_insights(Duration::from_secs(60));
        assert_eq!(
            insights.pattern_detection,
            vec![DetectedPattern {
                kind: "OperationalError".to_string(),
                occurrences: 3
            }]
        );
        assert_eq!(insights.recommendations.len(), 1);
        assert!(insights.recommendations[0].contains("database"));
    }

    #[test]
    fn zero_window_excludes_older_records() {
        let engine = ErrorAnalyticsEngine::default();
        engine.record_error(&AppError::operational("db"), &context(None), "c1");
        std::thread::sleep(Duration::from_millis(5));

        let insights = engine.generate_error_insights(Duration::ZERO);
        assert_eq!(insights.error_trends.total, 0);
        assert_eq!(insights.system_health, SystemHealth::Good);
    }

    #[test]
    fn recovery_effectiveness_is_success_ratio() {
        let engine = ErrorAnalyticsEngine::default();
        engine.record_recovery(true);
        engine.record_recovery(false);
        engine.record_recovery(true);
        engine.record_recovery(true);

        let insights = engine.generate_error_insights(Duration::from_secs(60));
        assert!((insights.recovery_effectiveness - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn capacity_bounds_retained_records() {
        let engine = ErrorAnalyticsEngine::new(2);
        for i in 0..5 {
            engine.record_error(&AppError::validation("x"), &context(None), &format!("c{i}"));
        }
        assert_eq!(engine.len(), 2);
    }
}
