//! opsguard HTTP server.
//!
//! Serves the health endpoints behind the correlation middleware and tears
//! everything down in order on SIGINT/SIGTERM.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use opsguard_server::network::{NetworkModule, ServerConfig};
use opsguard_server::observability::{init_tracing, ErrorAnalyticsEngine, RequestLifecycleTracker};
use opsguard_server::shutdown::{install_signal_handlers, GracefulShutdownManager};
use tracing::{debug, info};

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(250);
const INSIGHTS_WINDOW: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    config.validate()?;
    init_tracing(config.log_format)?;

    let manager = Arc::new(GracefulShutdownManager::new(config.shutdown_timeout()));
    let signals = install_signal_handlers(Arc::clone(&manager));

    let diagnostics = config.diagnostics();
    let tracker = Arc::new(RequestLifecycleTracker::new(diagnostics.lifecycle_capacity));
    let analytics = Arc::new(ErrorAnalyticsEngine::new(diagnostics.analytics_capacity));

    manager.register_background_thread("heartbeat", spawn_heartbeat(Arc::clone(&manager))?);
    manager.register_cleanup_handler("error_insights", {
        let analytics = Arc::clone(&analytics);
        move || {
            let insights = analytics.generate_error_insights(INSIGHTS_WINDOW);
            info!(insights = %serde_json::to_value(&insights)?, "final error insights");
            Ok(())
        }
    });
    manager.add_shutdown_callback({
        let tracker = Arc::clone(&tracker);
        move || {
            info!(
                lifecycle_events = tracker.len(),
                dropped = tracker.dropped(),
                "request trail at shutdown"
            );
        }
    });

    let mut module = NetworkModule::new(config.network(), Arc::clone(&manager), tracker, analytics);
    let port = module.start().await?;
    manager.register_server_instance(module.server_teardown());
    info!(port, "opsguard server ready");

    let served = module.serve(std::future::pending::<()>()).await;

    if manager.is_shutdown_initiated() {
        // The signal path exits the process once cleanup has finished.
        signals.await?;
    } else {
        signals.abort();
        let manager = Arc::clone(&manager);
        tokio::task::spawn_blocking(move || manager.shutdown("server exited")).await?;
    }
    served
}

fn spawn_heartbeat(manager: Arc<GracefulShutdownManager>) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("heartbeat".to_string())
        .spawn(move || {
            while !manager.is_shutdown_initiated() {
                debug!("heartbeat");
                thread::sleep(HEARTBEAT_INTERVAL);
            }
            debug!("heartbeat stopped");
        })
}
