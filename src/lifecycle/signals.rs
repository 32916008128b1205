//! OS signal handling.
//!
//! SIGINT/SIGTERM trigger graceful shutdown. SIGHUP (Unix) queues a manual
//! reconciliation that also reloads the mapping file.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::lifecycle::Shutdown;
use crate::watcher::{ChangeEvent, WatchMessage};

/// Wait for SIGINT or SIGTERM.
pub async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Trigger `shutdown` on the first termination signal.
pub fn spawn_termination_handler(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_termination().await;
        tracing::info!("Shutdown signal received");
        shutdown.trigger();
    })
}

/// Queue a manual reconciliation on every SIGHUP.
#[cfg(unix)]
pub fn spawn_reload_handler(
    mapping_path: PathBuf,
    queue: mpsc::Sender<WatchMessage>,
) -> Option<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGHUP handler");
            return None;
        }
    };

    Some(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, queueing reconciliation");
            if queue.send(Ok(ChangeEvent::manual(&mapping_path))).await.is_err() {
                break;
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_reload_handler(
    _mapping_path: PathBuf,
    _queue: mpsc::Sender<WatchMessage>,
) -> Option<tokio::task::JoinHandle<()>> {
    None
}
