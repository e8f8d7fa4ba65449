//! OS termination signal handling.
//!
//! A listener task waits for SIGINT/SIGTERM, runs the shutdown sequence on
//! a blocking thread, and (for [`install_signal_handlers`]) exits the
//! process afterwards so it still terminates the way the signal intended.
//! A second signal during cleanup exits immediately.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::manager::GracefulShutdownManager;

/// Termination signals the manager reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

impl TerminationSignal {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }

    /// Conventional exit status for a process terminated by this signal.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Interrupt => 130,
            Self::Terminate => 143,
        }
    }

    /// Reason string passed to [`GracefulShutdownManager::shutdown`].
    #[must_use]
    pub fn shutdown_reason(self) -> String {
        format!("signal: {}", self.name())
    }
}

/// Resolves when the process receives SIGINT or (on unix) SIGTERM.
///
/// # Errors
///
/// Returns an error if a signal handler cannot be installed.
pub async fn wait_for_termination() -> anyhow::Result<TerminationSignal> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                Ok(TerminationSignal::Interrupt)
            }
            _ = terminate.recv() => Ok(TerminationSignal::Terminate),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(TerminationSignal::Interrupt)
    }
}

/// Spawns a task that runs `manager.shutdown("signal: <name>")` when a
/// termination signal arrives, and yields that signal.
///
/// A second signal while cleanup is still running exits the process at once
/// with that signal's status.
///
/// Must be called from within a tokio runtime.
pub fn spawn_signal_listener(
    manager: Arc<GracefulShutdownManager>,
) -> JoinHandle<anyhow::Result<TerminationSignal>> {
    tokio::spawn(listen(manager, wait_for_termination, force_exit))
}

fn force_exit(signal: TerminationSignal) {
    error!(signal = signal.name(), "second termination signal, exiting without cleanup");
    std::process::exit(signal.exit_code());
}

/// Waits for one signal from `next_signal`, then runs the shutdown sequence
/// while listening for another. A second signal is handed to `force`.
async fn listen<S, F>(
    manager: Arc<GracefulShutdownManager>,
    mut next_signal: S,
    force: impl FnOnce(TerminationSignal) + Send,
) -> anyhow::Result<TerminationSignal>
where
    S: FnMut() -> F + Send,
    F: Future<Output = anyhow::Result<TerminationSignal>> + Send,
{
    let signal = next_signal().await?;
    warn!(signal = signal.name(), "termination signal received, shutting down");

    let reason = signal.shutdown_reason();
    let mut cleanup = tokio::task::spawn_blocking(move || manager.shutdown(&reason));
    tokio::select! {
        joined = &mut cleanup => {
            joined?;
        }
        second = next_signal() => {
            match second {
                Ok(second) => force(second),
                Err(err) => warn!(error = %err, "cannot listen for a second signal"),
            }
            cleanup.await?;
        }
    }
    Ok(signal)
}

/// Like [`spawn_signal_listener`], then exits the process with the signal's
/// conventional status once cleanup has run.
pub fn install_signal_handlers(manager: Arc<GracefulShutdownManager>) -> JoinHandle<()> {
    let listener = spawn_signal_listener(manager);
    tokio::spawn(async move {
        match listener.await {
            Ok(Ok(signal)) => std::process::exit(signal.exit_code()),
            Ok(Err(err)) => error!(error = %err, "signal listener failed"),
            Err(err) => error!(error = %err, "signal listener task aborted"),
        }
    })
}
