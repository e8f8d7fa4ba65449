//! Thread-local correlation id management.
//!
//! Each OS thread owns one correlation slot. There is no cross-thread
//! visibility: isolation comes from the slot being thread-local, so no
//! locking is involved. Async code that multiplexes tasks over threads
//! must go through [`crate::context::ContextScoped`] instead of relying
//! on the raw slot.

use std::cell::RefCell;
use std::time::{SystemTime, UNIX_EPOCH};

thread_local! {
    static CORRELATION_ID: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Placeholder used in log fields when no correlation id is active.
pub const UNKNOWN_CORRELATION_ID: &str = "unknown";

/// Generates, stores and clears the correlation id of the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationManager;

impl CorrelationManager {
    /// Generates a new id: 12 hex digits of randomness, `-`, unix millis.
    ///
    /// Practically unique without coordination. Not suitable as a secret.
    #[must_use]
    pub fn generate_correlation_id() -> String {
        let random = rand::random::<u64>() & 0xffff_ffff_ffff;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        format!("{random:012x}-{millis}")
    }

    /// Stores `id` for the current thread, overwriting any existing value.
    pub fn set_correlation_id(id: impl Into<String>) {
        let id = id.into();
        CORRELATION_ID.with(|slot| *slot.borrow_mut() = Some(id));
    }

    /// Returns the current thread's id, if one is set.
    #[must_use]
    pub fn get_correlation_id() -> Option<String> {
        CORRELATION_ID.with(|slot| slot.borrow().clone())
    }

    /// Returns the current id, generating and storing one first if unset.
    #[must_use]
    pub fn get_or_create() -> String {
        CORRELATION_ID.with(|slot| {
            slot.borrow_mut()
                .get_or_insert_with(Self::generate_correlation_id)
                .clone()
        })
    }

    /// Removes the slot so that [`Self::get_correlation_id`] returns `None`.
    pub fn clear_correlation_id() {
        CORRELATION_ID.with(|slot| slot.borrow_mut().take());
    }

    /// Returns the current id or [`UNKNOWN_CORRELATION_ID`].
    #[must_use]
    pub fn current_or_unknown() -> String {
        Self::get_correlation_id().unwrap_or_else(|| UNKNOWN_CORRELATION_ID.to_string())
    }

    /// Replaces the slot contents and returns what was there before.
    pub(crate) fn replace(id: Option<String>) -> Option<String> {
        CORRELATION_ID.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), id))
    }
}

/// Sets a correlation id for the current thread until the guard drops.
///
/// The previous id (or its absence) is restored on drop.
#[must_use = "the correlation id is reset as soon as the guard is dropped"]
pub fn correlation_context(id: impl Into<String>) -> CorrelationGuard {
    let previous = CorrelationManager::replace(Some(id.into()));
    CorrelationGuard { previous }
}

/// RAII guard returned by [`correlation_context`].
#[derive(Debug)]
pub struct CorrelationGuard {
    previous: Option<String>,
}

impl Drop for CorrelationGuard {
    fn drop(&mut self) {
        CorrelationManager::replace(self.previous.take());
    }
}
