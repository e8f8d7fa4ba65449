//! Network module with deferred startup lifecycle.
//!
//! `new()` creates resources, `start()` binds the TCP listener, and
//! `serve()` accepts connections until shutdown. Between construction and
//! `serve()` the caller registers [`NetworkModule::server_teardown`] with
//! the shutdown manager so the server is stopped as the final cleanup step.

use std::future::Future;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{health_handler, liveness_handler, readiness_handler, AppState};
use super::middleware::build_http_layers;
use super::middleware::CorrelationLayer;
use crate::observability::{CorrelationLogger, ErrorAnalyticsEngine, RequestLifecycleTracker};
use crate::shutdown::{GracefulShutdownManager, Teardown};

/// How long the server teardown waits for `serve()` to return.
pub const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Manages the HTTP server lifecycle.
///
/// 1. `new()` -- allocates shared state and the stop channels
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- accepts connections until the shutdown future resolves
///    or the teardown from [`Self::server_teardown`] runs
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<GracefulShutdownManager>,
    tracker: Arc<RequestLifecycleTracker>,
    analytics: Arc<ErrorAnalyticsEngine>,
    stop_tx: Arc<watch::Sender<bool>>,
    done_tx: SyncSender<()>,
    done_rx: Arc<Mutex<Receiver<()>>>,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        shutdown: Arc<GracefulShutdownManager>,
        tracker: Arc<RequestLifecycleTracker>,
        analytics: Arc<ErrorAnalyticsEngine>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        Self {
            config,
            listener: None,
            shutdown,
            tracker,
            analytics,
            stop_tx: Arc::new(stop_tx),
            done_tx,
            done_rx: Arc::new(Mutex::new(done_rx)),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> Arc<RequestLifecycleTracker> {
        Arc::clone(&self.tracker)
    }

    #[must_use]
    pub fn analytics(&self) -> Arc<ErrorAnalyticsEngine> {
        Arc::clone(&self.analytics)
    }

    #[must_use]
    pub fn shutdown_manager(&self) -> Arc<GracefulShutdownManager> {
        Arc::clone(&self.shutdown)
    }

    /// Returns the server's teardown for registration with the shutdown manager.
    ///
    /// Its `stop` asks `serve()` to finish and blocks until it has, for at
    /// most [`SERVER_STOP_TIMEOUT`]. It must run off the async worker that
    /// drives `serve()`; the shutdown manager's signal path already runs it
    /// on a blocking thread.
    #[must_use]
    pub fn server_teardown(&self) -> Teardown {
        let stop_tx = Arc::clone(&self.stop_tx);
        let done_rx = Arc::clone(&self.done_rx);
        let label = format!("http {}:{}", self.config.host, self.config.port);

        Teardown::stop(label, move || {
            stop_tx.send_replace(true);
            match done_rx.lock().recv_timeout(SERVER_STOP_TIMEOUT) {
                // Disconnected: serve() never ran or already returned.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => Ok(()),
                Err(RecvTimeoutError::Timeout) => Err(anyhow!(
                    "server did not stop within {}s",
                    SERVER_STOP_TIMEOUT.as_secs()
                )),
            }
        })
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- liveness check
    /// - `GET /health/ready` -- readiness check
    pub fn build_router(&self) -> Router {
        let state = AppState {
            shutdown: Arc::clone(&self.shutdown),
            tracker: Arc::clone(&self.tracker),
            analytics: Arc::clone(&self.analytics),
            start_time: Instant::now(),
        };
        let correlation = CorrelationLayer::new(Arc::clone(&self.tracker))
            .with_logger(CorrelationLogger::with_analytics(Arc::clone(&self.analytics)));

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .layer(build_http_layers(&self.config, correlation))
            .with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves or the server teardown runs.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server hits
    /// a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let stop_rx = self.stop_tx.subscribe();

        let signal = async move {
            tokio::select! {
                () = shutdown => {}
                () = stop_requested(stop_rx) => {}
            }
        };

        info!("Serving HTTP connections");
        let started = Instant::now();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await;

        match &result {
            Ok(()) => info!(
                uptime_secs = started.elapsed().as_secs(),
                "HTTP server stopped"
            ),
            Err(e) => warn!(error = %e, "HTTP server exited with error"),
        }
        // A full buffer means a previous stop was already acknowledged.
        let _ = self.done_tx.try_send(());
        result.map_err(Into::into)
    }
}

/// Resolves once the stop flag is raised. Pends forever if every sender is gone.
async fn stop_requested(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
