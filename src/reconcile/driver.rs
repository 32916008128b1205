//! The long-running reconciliation loop.

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::reconcile::reconciler::Reconciler;
use crate::reconcile::types::{ErrorClass, Phase};
use crate::watcher::{ChangeEvent, WatchError, WatchKind, WatchMessage};

/// Why the loop stopped before shutdown was requested.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("watcher lost: {0}")]
    WatcherLost(#[source] WatchError),
}

impl LoopError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Fatal
    }
}

/// Single consumer of the watch queue.
#[derive(Debug)]
pub struct ReconcileLoop {
    reconciler: Reconciler,
}

impl ReconcileLoop {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }

    /// Process events until shutdown or until every producer is gone.
    ///
    /// Shutdown is only observed between cycles. Returns the reconciler so its
    /// final state can be inspected. A watcher that used up its retries ends
    /// the loop with [`LoopError::WatcherLost`].
    pub async fn run(
        mut self,
        mut queue: mpsc::Receiver<WatchMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<Reconciler, LoopError> {
        tracing::info!("Reconciliation loop started");

        let mut listening = true;
        loop {
            let first = tokio::select! {
                biased;
                signal = shutdown.recv(), if listening => {
                    if let Err(broadcast::error::RecvError::Closed) = signal {
                        // Nobody can trigger shutdown any more.
                        listening = false;
                        continue;
                    }
                    tracing::info!("Shutdown requested; reconciliation loop stopping");
                    break;
                }
                message = queue.recv() => match message {
                    Some(message) => message,
                    None => {
                        tracing::info!("Event queue closed; reconciliation loop stopping");
                        break;
                    }
                },
            };

            let mut pending = PendingEvents::default();
            self.accept(&mut pending, first)?;
            while let Ok(message) = queue.try_recv() {
                self.accept(&mut pending, message)?;
            }

            for event in pending.into_ordered() {
                // Failures are logged inside the cycle; the loop keeps going.
                let _ = self.reconciler.run_cycle(&event).await;
            }
        }

        Ok(self.reconciler)
    }

    fn accept(
        &mut self,
        pending: &mut PendingEvents,
        message: WatchMessage,
    ) -> Result<(), LoopError> {
        match message {
            Ok(event) => pending.push(event),
            Err(e @ WatchError::RetriesExhausted { .. }) => {
                tracing::error!(error = %e, "Watcher gave up; reconciliation loop stopping");
                self.reconciler.set_phase(Phase::Degraded);
                return Err(LoopError::WatcherLost(e));
            }
            Err(e) => tracing::warn!(error = %e, "Watcher error"),
        }
        Ok(())
    }
}

/// Events waiting for a cycle, at most one per kind.
#[derive(Debug, Default)]
struct PendingEvents {
    latest: BTreeMap<WatchKind, ChangeEvent>,
}

impl PendingEvents {
    fn push(&mut self, event: ChangeEvent) {
        if let Some(replaced) = self.latest.insert(event.kind, event) {
            tracing::debug!(kind = replaced.kind.as_str(), "Coalesced queued event");
        }
    }

    /// Mapping changes first, then certificate store changes, then manual
    /// requests.
    fn into_ordered(self) -> impl Iterator<Item = ChangeEvent> {
        self.latest.into_values()
    }
}
