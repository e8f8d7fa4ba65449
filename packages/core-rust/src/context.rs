//! Per-operation user context stored in thread-local storage.
//!
//! A context always implies a correlation id: building one installs (or
//! reuses) the thread's correlation id, and clearing one clears both.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::correlation::CorrelationManager;

/// Default user agent when the caller did not provide one.
pub const UNKNOWN_USER_AGENT: &str = "unknown";
/// Default IP address when the caller did not provide one.
pub const UNKNOWN_IP_ADDRESS: &str = "0.0.0.0";

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<UserContext>> = const { RefCell::new(None) };
}

/// Identity, tracing and personalisation data for one logical operation.
#[derive(Debug, Clone, PartialEq)]
pub struct UserContext {
    pub correlation_id: String,
    pub user_id: Option<String>,
    pub session_id: String,
    pub request_id: String,
    pub ip_address: String,
    pub user_agent: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    pub permissions: Vec<String>,
    /// Personalisation data. Never logged; see [`Self::sanitize_for_logging`].
    pub preferences: Map<String, Value>,
    pub performance_budget: BTreeMap<String, f64>,
}

impl UserContext {
    /// Returns every field except `preferences`.
    #[must_use]
    pub fn sanitize_for_logging(&self) -> SanitizedContext {
        SanitizedContext {
            correlation_id: self.correlation_id.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            request_id: self.request_id.clone(),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            timestamp: self.timestamp,
            permissions: self.permissions.clone(),
            performance_budget: self.performance_budget.clone(),
        }
    }

    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Returns `true` when a non-empty user id is known.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// Log-safe projection of a [`UserContext`].
///
/// Has no `preferences` field, so serializing it can never leak them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanitizedContext {
    pub correlation_id: String,
    pub user_id: Option<String>,
    pub session_id: String,
    pub request_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
    pub permissions: Vec<String>,
    pub performance_budget: BTreeMap<String, f64>,
}

/// Inbound request data used to build a [`UserContext`]. All fields optional.
#[derive(Debug, Clone, Default)]
pub struct RequestData {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    /// Propagated correlation id (e.g. from an `X-Correlation-ID` header).
    pub correlation_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub permissions: Vec<String>,
    pub preferences: Map<String, Value>,
    pub performance_budget: BTreeMap<String, f64>,
}

impl RequestData {
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Both thread-local slots (context and correlation id) captured together.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    pub context: Option<UserContext>,
    pub correlation_id: Option<String>,
}

/// Builds, exposes and clears the current thread's [`UserContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextManager;

impl ContextManager {
    /// Builds a context from `data` and stores it, replacing any prior context.
    ///
    /// Missing session and request ids are generated. A propagated
    /// correlation id wins over the thread's current one.
    pub fn build_context(data: RequestData) -> UserContext {
        if let Some(id) = data.correlation_id.filter(|id| !id.is_empty()) {
            CorrelationManager::set_correlation_id(id);
        }
        let correlation_id = CorrelationManager::get_or_create();

        let context = UserContext {
            correlation_id,
            user_id: data.user_id.filter(|id| !id.is_empty()),
            session_id: data
                .session_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            request_id: data
                .request_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ip_address: data
                .ip_address
                .unwrap_or_else(|| UNKNOWN_IP_ADDRESS.to_string()),
            user_agent: data
                .user_agent
                .unwrap_or_else(|| UNKNOWN_USER_AGENT.to_string()),
            timestamp: Utc::now(),
            permissions: data.permissions,
            preferences: data.preferences,
            performance_budget: data.performance_budget,
        };

        CURRENT_CONTEXT.with(|slot| *slot.borrow_mut() = Some(context.clone()));
        context
    }

    /// Returns a clone of the current thread's context, if any.
    #[must_use]
    pub fn get_context() -> Option<UserContext> {
        CURRENT_CONTEXT.with(|slot| slot.borrow().clone())
    }

    /// Removes the context and the correlation id.
    pub fn clear_context() {
        CURRENT_CONTEXT.with(|slot| slot.borrow_mut().take());
        CorrelationManager::clear_correlation_id();
    }

    /// Installs `snapshot` into both slots and returns what they held before.
    pub fn swap(snapshot: ContextSnapshot) -> ContextSnapshot {
        let context = CURRENT_CONTEXT.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), snapshot.context));
        let correlation_id = CorrelationManager::replace(snapshot.correlation_id);
        ContextSnapshot {
            context,
            correlation_id,
        }
    }

    /// Moves the current thread's state out, leaving both slots empty.
    #[must_use]
    pub fn detach() -> ContextSnapshot {
        Self::swap(ContextSnapshot::default())
    }

    /// Wraps `future` so that `snapshot` is the thread-local state during every poll.
    pub fn scope<F: Future>(snapshot: ContextSnapshot, future: F) -> ContextScoped<F> {
        ContextScoped {
            inner: Box::pin(future),
            state: Some(snapshot),
        }
    }
}

/// Future adapter that carries a [`ContextSnapshot`] with a logical task.
///
/// On each poll the snapshot is installed into the thread-local slots, and
/// whatever the future left there is captured back afterwards, so the
/// context follows the task across worker threads and never leaks into
/// unrelated tasks sharing the same thread.
pub struct ContextScoped<F> {
    inner: Pin<Box<F>>,
    state: Option<ContextSnapshot>,
}

impl<F> std::fmt::Debug for ContextScoped<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextScoped")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<F: Future> Future for ContextScoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut restore = RestoreOnDrop {
            previous: Some(ContextManager::swap(this.state.take().unwrap_or_default())),
            captured: &mut this.state,
        };
        let output = this.inner.as_mut().poll(cx);
        restore.finish();
        output
    }
}

/// Puts the thread's previous state back even if the inner poll panics.
struct RestoreOnDrop<'a> {
    previous: Option<ContextSnapshot>,
    captured: &'a mut Option<ContextSnapshot>,
}

impl RestoreOnDrop<'_> {
    fn finish(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.captured = Some(ContextManager::swap(previous));
        }
    }
}

impl Drop for RestoreOnDrop<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
