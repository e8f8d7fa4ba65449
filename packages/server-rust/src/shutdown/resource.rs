//! Teardown capability for resources registered with the shutdown manager.
//!
//! Database connections and server instances are adapted into [`Closeable`]
//! at the registration call site, so the underlying types need no changes.

use std::fmt;

/// A resource the shutdown manager knows how to tear down.
pub trait Closeable: Send + Sync {
    /// Releases the resource. Called at most once by the shutdown manager.
    ///
    /// # Errors
    ///
    /// Returns an error if teardown failed. The error is recorded, never propagated.
    fn close(&self) -> anyhow::Result<()>;

    /// Human-readable label used in cleanup results and logs.
    fn label(&self) -> String {
        "resource".to_string()
    }

    /// Which teardown operation [`Self::close`] performs (`close`, `stop`, ...).
    fn verb(&self) -> &'static str {
        "close"
    }
}

type TeardownFn = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Closure-backed [`Closeable`].
///
/// The constructors mirror the teardown verbs a resource might expose.
/// Connections prefer `close` then `disconnect`; servers prefer `stop`,
/// then `shutdown`, then `close`.
pub struct Teardown {
    label: String,
    verb: &'static str,
    action: TeardownFn,
}

impl Teardown {
    pub fn new<F>(label: impl Into<String>, verb: &'static str, action: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            verb,
            action: Box::new(action),
        }
    }

    pub fn close<F>(label: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(label, "close", action)
    }

    pub fn disconnect<F>(label: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(label, "disconnect", action)
    }

    pub fn stop<F>(label: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(label, "stop", action)
    }

    pub fn shutdown<F>(label: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(label, "shutdown", action)
    }
}

impl Closeable for Teardown {
    fn close(&self) -> anyhow::Result<()> {
        (self.action)()
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn verb(&self) -> &'static str {
        self.verb
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("label", &self.label)
            .field("verb", &self.verb)
            .finish_non_exhaustive()
    }
}
