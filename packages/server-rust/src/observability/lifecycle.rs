//! Bounded diagnostic trail of request start/end events keyed by correlation id.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use opsguard_core::SanitizedContext;
use parking_lot::Mutex;
use serde::Serialize;

/// Default number of events retained before the oldest are evicted.
pub const DEFAULT_LIFECYCLE_CAPACITY: usize = 10_000;

/// One entry of the request lifecycle trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Start {
        correlation_id: String,
        context: SanitizedContext,
        at: DateTime<Utc>,
    },
    End {
        correlation_id: String,
        status: u16,
        at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Start { correlation_id, .. } | Self::End { correlation_id, .. } => correlation_id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::End { .. } => "end",
        }
    }
}

/// Append-only ring of [`LifecycleEvent`]s. When full, the oldest event is
/// evicted and counted in [`Self::dropped`].
#[derive(Debug)]
pub struct RequestLifecycleTracker {
    capacity: usize,
    events: Mutex<VecDeque<LifecycleEvent>>,
    dropped: AtomicU64,
}

impl RequestLifecycleTracker {
    /// Creates a tracker retaining at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn track_request_start(&self, correlation_id: &str, context: SanitizedContext) {
        self.push(LifecycleEvent::Start {
            correlation_id: correlation_id.to_string(),
            context,
            at: Utc::now(),
        });
    }

    pub fn track_request_end(&self, correlation_id: &str, status: u16) {
        self.push(LifecycleEvent::End {
            correlation_id: correlation_id.to_string(),
            status,
            at: Utc::now(),
        });
    }

    /// Snapshot of all retained events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Retained events for one correlation id, oldest first.
    #[must_use]
    pub fn events_for(&self, correlation_id: &str) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.correlation_id() == correlation_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events evicted because the ring was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn push(&self, event: LifecycleEvent) {
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event);
    }
}

impl Default for RequestLifecycleTracker {
    fn default() -> Self {
        Self::new(DEFAULT_LIFECYCLE_CAPACITY)
    }
}
