//! C11 — process lifecycle. SIGCHLD marks the companion proxy for a forced
//! respawn; SIGINT/SIGTERM trigger the graceful shutdown sequence: stop the
//! dispatcher, stop the driver, then hold the process open briefly so
//! external uninstall tooling can observe terminal state before exit.

use crate::driver::SchedulerDriver;
use crate::store::Store;
use scheduler_types::RestartFlag;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Grace period held open after shutdown is triggered, long enough for
/// external tooling polling `/status` to observe the terminal state.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

/// Installs the SIGCHLD handler, which persists `RestartFlag::FreshStart` so
/// the next tick's `manageClusterRestart` respawns the companion proxy.
/// Runs until `cancel` fires.
#[cfg(unix)]
pub fn spawn_sigchld_handler(store: Arc<dyn Store>, path: String, cancel: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut sigchld = match signal(SignalKind::child()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGCHLD handler");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = sigchld.recv() => {
                    if received.is_none() {
                        break;
                    }
                    tracing::info!("SIGCHLD received, scheduling companion proxy restart");
                    if let Err(e) = store.set_restart_flag(&path, RestartFlag::FreshStart).await {
                        tracing::error!(error = %e, "failed to persist fresh-start flag");
                    }
                }
            }
        }
    });
}

#[cfg(not(unix))]
pub fn spawn_sigchld_handler(_store: Arc<dyn Store>, _path: String, _cancel: CancellationToken) {}

/// Waits for SIGINT/SIGTERM, cancels `cancel` so the dispatcher and HTTP
/// server exit their loops, stops the driver, then holds the process open
/// for [`SHUTDOWN_DRAIN`] before returning.
pub async fn graceful_shutdown(cancel: CancellationToken, driver: Arc<dyn SchedulerDriver>) {
    scheduler_common::shutdown::shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping dispatcher");
    cancel.cancel();
    driver.stop().await;
    tracing::info!(drain_secs = SHUTDOWN_DRAIN.as_secs(), "holding process open for drain window");
    tokio::time::sleep(SHUTDOWN_DRAIN).await;
}
