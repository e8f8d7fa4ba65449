//! Graceful shutdown orchestration with bulkheaded per-resource cleanup.
//!
//! Uses `ArcSwap` for lock-free phase reads and an atomic test-and-set so
//! the shutdown sequence runs exactly once even under concurrent callers.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::resource::Closeable;

/// Default overall shutdown budget.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between `is_finished` checks while joining a background thread.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shutdown state machine: Running -> `ShuttingDown` -> Completed.
///
/// There is no transition back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPhase {
    /// Normal operation.
    Running,
    /// `shutdown()` has been invoked and the cleanup sequence is running.
    ShuttingDown,
    /// The cleanup sequence ran to the end. The process is expected to exit.
    Completed,
}

impl ShutdownPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Completed => "completed",
        }
    }
}

/// Result of tearing down one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupOutcome {
    Ok,
    Failed { error: String },
    /// A background thread was still running when its time slice ran out.
    Abandoned { waited_ms: u64 },
}

impl CleanupOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Process-wide shutdown bookkeeping. Mutated only by the shutdown sequence.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownContext {
    pub shutdown_initiated: bool,
    pub reason: Option<String>,
    pub timeout_seconds: f64,
    /// Named cleanup handlers not yet cleaned successfully.
    pub active_resources: BTreeSet<String>,
    /// Keyed `handler:<name>`, `callback:<i>`, `thread:<i>:<name>`,
    /// `database:<i>:<label>` or `server:<i>:<label>`.
    pub cleanup_results: BTreeMap<String, CleanupOutcome>,
}

/// Number of resources currently waiting for shutdown, per registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisteredResources {
    pub cleanup_handlers: usize,
    pub shutdown_callbacks: usize,
    pub background_threads: usize,
    pub database_connections: usize,
    pub server_instances: usize,
}

/// Snapshot returned by [`GracefulShutdownManager::get_shutdown_status`].
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownStatus {
    pub phase: ShutdownPhase,
    #[serde(flatten)]
    pub context: ShutdownContext,
    pub registered: RegisteredResources,
}

type CleanupHandler = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;
type ShutdownCallback = Box<dyn FnOnce() + Send>;

/// Coordinates teardown of callbacks, named handlers, background threads,
/// database connections and server instances within a soft time budget.
///
/// The manager never creates resources; callers register what they own.
/// Cleanup phases run strictly in this order, each in registration order:
/// callbacks, named handlers, threads, database connections, servers.
pub struct GracefulShutdownManager {
    timeout: Duration,
    initiated: AtomicBool,
    phase: ArcSwap<ShutdownPhase>,
    context: Mutex<ShutdownContext>,
    cleanup_handlers: Mutex<Vec<(String, CleanupHandler)>>,
    callbacks: Mutex<Vec<ShutdownCallback>>,
    threads: Mutex<Vec<(String, JoinHandle<()>)>>,
    connections: Mutex<Vec<Box<dyn Closeable>>>,
    servers: Mutex<Vec<Box<dyn Closeable>>>,
}

impl GracefulShutdownManager {
    /// Creates a manager in the `Running` phase with empty registries.
    ///
    /// Signal handling is installed separately via
    /// [`super::signals::install_signal_handlers`].
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            initiated: AtomicBool::new(false),
            phase: ArcSwap::from_pointee(ShutdownPhase::Running),
            context: Mutex::new(ShutdownContext {
                shutdown_initiated: false,
                reason: None,
                timeout_seconds: timeout.as_secs_f64(),
                active_resources: BTreeSet::new(),
                cleanup_results: BTreeMap::new(),
            }),
            cleanup_handlers: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
            servers: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers a named cleanup handler. Re-registering a name replaces the
    /// previous handler in place.
    pub fn register_cleanup_handler<F>(&self, name: impl Into<String>, handler: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let name = name.into();
        self.warn_if_late("cleanup handler", &name);
        {
            let mut handlers = self.cleanup_handlers.lock();
            if let Some(slot) = handlers.iter_mut().find(|(existing, _)| *existing == name) {
                slot.1 = Box::new(handler);
            } else {
                handlers.push((name.clone(), Box::new(handler)));
            }
        }
        self.context.lock().active_resources.insert(name.clone());
        debug!(resource = %name, "cleanup handler registered");
    }

    /// Registers a background thread to be joined during shutdown.
    pub fn register_background_thread(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        let name = name.into();
        self.warn_if_late("background thread", &name);
        self.threads.lock().push((name, handle));
    }

    /// Registers a database connection, adapted into [`Closeable`].
    pub fn register_database_connection(&self, connection: impl Closeable + 'static) {
        self.warn_if_late("database connection", &connection.label());
        self.connections.lock().push(Box::new(connection));
    }

    /// Registers a server instance, adapted into [`Closeable`].
    pub fn register_server_instance(&self, server: impl Closeable + 'static) {
        self.warn_if_late("server instance", &server.label());
        self.servers.lock().push(Box::new(server));
    }

    /// Appends a callback invoked first during shutdown.
    pub fn add_shutdown_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.warn_if_late("shutdown callback", "callback");
        self.callbacks.lock().push(Box::new(callback));
    }

    #[must_use]
    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        **self.phase.load()
    }

    /// Returns a snapshot of the shutdown context and registry sizes.
    #[must_use]
    pub fn get_shutdown_status(&self) -> ShutdownStatus {
        let registered = RegisteredResources {
            cleanup_handlers: self.cleanup_handlers.lock().len(),
            shutdown_callbacks: self.callbacks.lock().len(),
            background_threads: self.threads.lock().len(),
            database_connections: self.connections.lock().len(),
            server_instances: self.servers.lock().len(),
        };
        ShutdownStatus {
            phase: self.phase(),
            context: self.context.lock().clone(),
            registered,
        }
    }

    /// Runs the shutdown sequence once.
    ///
    /// Returns `true` when the sequence ran to completion, including when
    /// individual resources failed (see [`Self::get_shutdown_status`]) or
    /// threads were abandoned. A call made while a shutdown is already in
    /// progress or finished returns `true` immediately without side effects.
    pub fn shutdown(&self, reason: &str) -> bool {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(reason, "shutdown already initiated, ignoring");
            return true;
        }

        let started = Instant::now();
        let deadline = started + self.timeout;
        self.phase.store(Arc::new(ShutdownPhase::ShuttingDown));
        {
            let mut ctx = self.context.lock();
            ctx.shutdown_initiated = true;
            ctx.reason = Some(reason.to_string());
        }
        info!(
            reason,
            timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            "graceful shutdown initiated"
        );

        self.run_callbacks();
        self.run_cleanup_handlers();
        self.join_threads(deadline);
        self.close_connections();
        self.stop_servers();

        self.phase.store(Arc::new(ShutdownPhase::Completed));
        let failures = self
            .context
            .lock()
            .cleanup_results
            .values()
            .filter(|outcome| !outcome.is_ok())
            .count();
        info!(
            reason,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            failures,
            "graceful shutdown complete"
        );
        true
    }

    fn run_callbacks(&self) {
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for (index, callback) in callbacks.into_iter().enumerate() {
            let outcome = contain(|| {
                callback();
                Ok(())
            });
            self.record(format!("callback:{index}"), outcome);
        }
    }

    fn run_cleanup_handlers(&self) {
        let handlers = std::mem::take(&mut *self.cleanup_handlers.lock());
        for (name, handler) in handlers {
            let outcome = contain(handler);
            if outcome.is_ok() {
                self.context.lock().active_resources.remove(&name);
            }
            self.record(format!("handler:{name}"), outcome);
        }
    }

    /// Joins threads in registration order. Each thread gets the remaining
    /// budget split evenly across the threads not yet joined, so one slow
    /// thread cannot starve the rest.
    fn join_threads(&self, deadline: Instant) {
        let threads = std::mem::take(&mut *self.threads.lock());
        let total = threads.len();
        for (index, (name, handle)) in threads.into_iter().enumerate() {
            let pending = u32::try_from(total - index).unwrap_or(u32::MAX);
            let slice = deadline.saturating_duration_since(Instant::now()) / pending;
            let outcome = join_with_timeout(handle, slice);
            if let CleanupOutcome::Abandoned { waited_ms } = outcome {
                warn!(thread = %name, waited_ms, "background thread still running, abandoning");
            }
            self.record(format!("thread:{index}:{name}"), outcome);
        }
    }

    fn close_connections(&self) {
        let connections = std::mem::take(&mut *self.connections.lock());
        for (index, connection) in connections.into_iter().enumerate() {
            let key = format!("database:{index}:{}", connection.label());
            debug!(resource = %key, verb = connection.verb(), "closing database connection");
            let outcome = contain(|| connection.close());
            self.record(key, outcome);
        }
    }

    fn stop_servers(&self) {
        let servers = std::mem::take(&mut *self.servers.lock());
        for (index, server) in servers.into_iter().enumerate() {
            let key = format!("server:{index}:{}", server.label());
            debug!(resource = %key, verb = server.verb(), "stopping server instance");
            let outcome = contain(|| server.close());
            self.record(key, outcome);
        }
    }

    fn record(&self, key: String, outcome: CleanupOutcome) {
        if let CleanupOutcome::Failed { error } = &outcome {
            warn!(resource = %key, error = %error, "cleanup failed");
            metrics::counter!("opsguard_shutdown_cleanup_failures_total").increment(1);
        }
        self.context.lock().cleanup_results.insert(key, outcome);
    }

    fn warn_if_late(&self, what: &str, name: &str) {
        if self.is_shutdown_initiated() {
            warn!(resource = name, kind = what, "registered after shutdown was initiated");
        }
    }
}

impl Default for GracefulShutdownManager {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}

impl std::fmt::Debug for GracefulShutdownManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GracefulShutdownManager")
            .field("timeout", &self.timeout)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Runs `f`, turning both errors and panics into a recorded outcome.
fn contain<F>(f: F) -> CleanupOutcome
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => CleanupOutcome::Ok,
        Ok(Err(err)) => CleanupOutcome::Failed {
            error: format!("{err:#}"),
        },
        Err(payload) => CleanupOutcome::Failed {
            error: format!("panicked: {}", panic_message(payload.as_ref())),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}

/// Waits for `handle` up to `budget`. A thread still running afterwards is
/// detached, since OS threads cannot be killed safely.
fn join_with_timeout(handle: JoinHandle<()>, budget: Duration) -> CleanupOutcome {
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            return match handle.join() {
                Ok(()) => CleanupOutcome::Ok,
                Err(payload) => CleanupOutcome::Failed {
                    error: format!("thread panicked: {}", panic_message(payload.as_ref())),
                },
            };
        }

        let elapsed = start.elapsed();
        if elapsed >= budget {
            return CleanupOutcome::Abandoned {
                waited_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            };
        }

        std::thread::sleep(JOIN_POLL_INTERVAL.min(budget - elapsed));
    }
}

// ---------------------------------------------------------------------------
// Process-wide instance
// ---------------------------------------------------------------------------

static GLOBAL: OnceLock<Arc<GracefulShutdownManager>> = OnceLock::new();

/// Initializes the process-wide manager. Returns `false` if it already existed,
/// in which case `timeout` is ignored.
pub fn init_global(timeout: Duration) -> bool {
    let mut created = false;
    GLOBAL.get_or_init(|| {
        created = true;
        Arc::new(GracefulShutdownManager::new(timeout))
    });
    created
}

/// Returns the process-wide manager, creating it with the default timeout if needed.
pub fn global() -> Arc<GracefulShutdownManager> {
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(GracefulShutdownManager::default())))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::shutdown::Teardown;

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    /// Exposes only `close`.
    struct CloseOnlyConnection {
        closes: Arc<AtomicU32>,
        fail: bool,
    }

    impl CloseOnlyConnection {
        fn close(&self) -> anyhow::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("connection already broken");
            }
            Ok(())
        }
    }

    /// Exposes only `disconnect`.
    struct DisconnectOnlyConnection {
        disconnects: Arc<AtomicU32>,
    }

    impl DisconnectOnlyConnection {
        fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn initial_phase_is_running() {
        let manager = GracefulShutdownManager::new(Duration::from_secs(1));
        assert_eq!(manager.phase(), ShutdownPhase::Running);
        assert!(!manager.is_shutdown_initiated());

        let status = manager.get_shutdown_status();
        assert!(!status.context.shutdown_initiated);
        assert!(status.context.reason.is_none());
        assert!(status.context.cleanup_results.is_empty());
    }

    #[test]
    fn shutdown_transitions_to_completed() {
        let manager = GracefulShutdownManager::new(Duration::from_secs(1));
        assert!(manager.shutdown("test"));
        assert_eq!(manager.phase(), ShutdownPhase::Completed);
        assert!(manager.is_shutdown_initiated());
    }

    #[test]
    fn shutdown_is_idempotent_and_keeps_first_reason() {
        let manager = GracefulShutdownManager::new(Duration::from_secs(1));
        let calls = counter();
        let c = Arc::clone(&calls);
        manager.register_cleanup_handler("cache", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(manager.shutdown("first"));
        assert!(manager.shutdown("second"));

        let status = manager.get_shutdown_status();
        assert_eq!(status.context.reason.as_deref(), Some("first"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let manager = GracefulShutdownManager::new(Duration::from_secs(1));
        let flushed = counter();
        let f = Arc::clone(&flushed);

        manager.register_cleanup_handler("broken", || Err(anyhow::anyhow!("disk full")));
        manager.register_cleanup_handler("panicky", || panic!("handler bug"));
        manager.register_cleanup_handler("flush", move || {
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(manager.shutdown("test"));
        assert_eq!(flushed.load(Ordering::SeqCst), 1);

        let status = manager.get_shutdown_status();
        let results = &status.context.cleanup_results;
        assert_eq!(results["handler:flush"], CleanupOutcome::Ok);
        assert_eq!(
            results["handler:broken"],
            CleanupOutcome::Failed {
                error: "disk full".to_string()
            }
        );
        assert!(matches!(&results["handler:panicky"], CleanupOutcome::Failed { error } if error.contains("handler bug")));

        // Failed handlers remain active; successful ones are removed.
        assert!(status.context.active_resources.contains("broken"));
        assert!(!status.context.active_resources.contains("flush"));
    }

    #[test]
    fn reregistering_name_overwrites_handler() {
        let manager = GracefulShutdownManager::new(Duration::from_secs(1));
        let first = counter();
        let second = counter();
        let (a, b) = (Arc::clone(&first), Arc::clone(&second));

        manager.register_cleanup_handler("db", move || {
            a.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        manager.register_cleanup_handler("db", move || {
            b.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let status = manager.get_shutdown_status();
        assert_eq!(status.registered.cleanup_handlers, 1);
        assert_eq!(status.context.active_resources.len(), 1);

        manager.shutdown("test");
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_run_in_order_before_handlers_despite_panics() {
        let manager = GracefulShutdownManager::new(Duration::from_secs(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        manager.register_cleanup_handler("handler", move || {
            o.lock().push("handler");
            Ok(())
        });
        let o = Arc::clone(&order);
        manager.add_shutdown_callback(move || o.lock().push("callback-0"));
        manager.add_shutdown_callback(|| panic!("callback bug"));
        let o = Arc::clone(&order);
        manager.add_shutdown_callback(move || o.lock().push("callback-2"));

        manager.shutdown("test");

        assert_eq!(*order.lock(), vec!["callback-0", "callback-2", "handler"]);
        let results = manager.get_shutdown_status().context.cleanup_results;
        assert!(results["callback:0"].is_ok());
        assert!(!results["callback:1"].is_ok());
    }

    #[test]
    fn slow_thread_is_abandoned_within_budget() {
        let manager = GracefulShutdownManager::new(Duration::from_secs(1));
        manager.register_background_thread(
            "sleeper",
            thread::spawn(|| thread::sleep(Duration::from_secs(5))),
        );

        let start = Instant::now();
        assert!(manager.shutdown("test"));
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(900), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "waited too long: {elapsed:?}");
        let results = manager.get_shutdown_status().context.cleanup_results;
        assert!(matches!(results["thread:0:sleeper"], CleanupOutcome::Abandoned { .. }));
    }

    #[test]
    fn finished_threads_are_joined() {
        let manager = GracefulShutdownManager::new(Duration::from_secs(2));
        let stop = Arc::new(AtomicBool::new(false));
        let s = Arc::clone(&stop);
        manager.register_background_thread(
            "poller",
            thread::spawn(move || {
                while !s.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
            }),
        );
        let s = Arc::clone(&stop);
        manager.add_shutdown_callback(move || s.store(true, Ordering::SeqCst));
        manager.register_background_thread("panics", thread::spawn(|| panic!("worker crashed")));

        let start = Instant::now();
        manager.shutdown("test");
        assert!(start.elapsed() < Duration::from_secs(1));

        let results = manager.get_shutdown_status().context.cleanup_results;
        assert_eq!(results["thread:0:poller"], CleanupOutcome::Ok);
        assert!(matches!(&results["thread:1:panics"], CleanupOutcome::Failed { error } if error.contains("worker crashed")));
    }

    #[test]
    fn slow_thread_leaves_budget_for_later_threads() {
        let manager = GracefulShutdownManager::new(Duration::from_millis(600));
        manager.register_background_thread(
            "slow",
            thread::spawn(|| thread::sleep(Duration::from_secs(5))),
        );
        manager.register_background_thread(
            "quick",
            thread::spawn(|| thread::sleep(Duration::from_millis(150))),
        );

        manager.shutdown("test");

        let results = manager.get_shutdown_status().context.cleanup_results;
        assert!(matches!(results["thread:0:slow"], CleanupOutcome::Abandoned { .. }));
        assert_eq!(results["thread:1:quick"], CleanupOutcome::Ok);
    }

    #[test]
    fn same_named_threads_keep_separate_outcomes() {
        let manager = GracefulShutdownManager::new(Duration::from_millis(300));
        manager.register_background_thread(
            "worker",
            thread::spawn(|| thread::sleep(Duration::from_secs(3))),
        );
        manager.register_background_thread("worker", thread::spawn(|| {}));

        manager.shutdown("test");

        let results = manager.get_shutdown_status().context.cleanup_results;
        assert_eq!(results.len(), 2);
        assert!(matches!(results["thread:0:worker"], CleanupOutcome::Abandoned { .. }));
        assert_eq!(results["thread:1:worker"], CleanupOutcome::Ok);
    }

    #[test]
    fn handler_names_cannot_shadow_generated_keys() {
        let manager = GracefulShutdownManager::new(Duration::from_secs(1));
        manager.add_shutdown_callback(|| panic!("callback bug"));
        manager.register_cleanup_handler("callback:0", || Ok(()));

        manager.shutdown("test");

        let results = manager.get_shutdown_status().context.cleanup_results;
        assert!(!results["callback:0"].is_ok());
        assert!(results["handler:callback:0"].is_ok());
    }

    #[test]
    fn connections_are_closed_with_their_own_verb() {
        let manager = GracefulShutdownManager::new(Duration::from_secs(1));

        let closes = counter();
        let close_only = Arc::new(CloseOnlyConnection {
            closes: Arc::clone(&closes),
            fail: false,
        });
        let disconnects = counter();
        let disconnect_only = Arc::new(DisconnectOnlyConnection {
            disconnects: Arc::clone(&disconnects),
        });

        let conn = Arc::clone(&close_only);
        manager.register_database_connection(Teardown::close("primary", move || conn.close()));
        let conn = Arc::clone(&disconnect_only);
        manager.register_database_connection(Teardown::disconnect("replica", move || {
            conn.disconnect();
            Ok(())
        }));

        manager.shutdown("test");
        manager.shutdown("again");

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        let results = manager.get_shutdown_status().context.cleanup_results;
        assert!(results["database:0:primary"].is_ok());
        assert!(results["database:1:replica"].is_ok());
    }

    #[test]
    fn broken_connection_does_not_block_next_one() {
        let manager = GracefulShutdownManager::new(Duration::from_secs(1));
        let broken_closes = counter();
        let healthy_closes = counter();

        let broken = CloseOnlyConnection {
            closes: Arc::clone(&broken_closes),
            fail: true,
        };
        let healthy = CloseOnlyConnection {
            closes: Arc::clone(&healthy_closes),
            fail: false,
        };
        manager.register_database_connection(Teardown::close("broken", move || broken.close()));
        manager.register_database_connection(Teardown::close("healthy", move || healthy.close()));

        assert!(manager.shutdown("test"));
        assert_eq!(broken_closes.load(Ordering::SeqCst), 1);
        assert_eq!(healthy_closes.load(Ordering::SeqCst), 1);

        let results = manager.get_shutdown_status().context.cleanup_results;
        assert!(!results["database:0:broken"].is_ok());
        assert!(results["database:1:healthy"].is_ok());
    }

    #[test]
    fn servers_stop_after_connections() {
        let manager = GracefulShutdownManager::new(Duration::from_secs(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        manager.register_server_instance(Teardown::stop("http", move || {
            o.lock().push("server");
            Ok(())
        }));
        let o = Arc::clone(&order);
        manager.register_database_connection(Teardown::close("db", move || {
            o.lock().push("database");
            Ok(())
        }));
        manager.register_server_instance(Teardown::shutdown("grpc", || {
            Err(anyhow::anyhow!("already stopped"))
        }));

        manager.shutdown("test");

        assert_eq!(*order.lock(), vec!["database", "server"]);
        let results = manager.get_shutdown_status().context.cleanup_results;
        assert!(results["server:0:http"].is_ok());
        assert!(!results["server:1:grpc"].is_ok());
    }

    #[test]
    fn concurrent_callers_run_sequence_once() {
        let manager = Arc::new(GracefulShutdownManager::new(Duration::from_secs(1)));
        let calls = counter();
        let c = Arc::clone(&calls);
        manager.register_cleanup_handler("once", move || {
            c.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            Ok(())
        });

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    manager.shutdown(&format!("caller-{i}"))
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_serializes_flat() {
        let manager = GracefulShutdownManager::new(Duration::from_millis(1500));
        manager.register_cleanup_handler("cache", || Ok(()));
        manager.shutdown("deploy");

        let json = serde_json::to_value(manager.get_shutdown_status()).unwrap();
        assert_eq!(json["shutdown_initiated"], true);
        assert_eq!(json["reason"], "deploy");
        assert_eq!(json["phase"], "completed");
        assert_eq!(json["timeout_seconds"], 1.5);
        assert_eq!(json["cleanup_results"]["handler:cache"]["status"], "ok");
        assert_eq!(json["registered"]["cleanup_handlers"], 0);
    }

    #[test]
    fn global_instance_is_shared() {
        init_global(Duration::from_secs(5));
        assert!(!init_global(Duration::from_secs(10)));
        assert!(Arc::ptr_eq(&global(), &global()));
    }
}
