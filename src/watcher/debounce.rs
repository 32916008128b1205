//! Debouncing of raw filesystem events.
//!
//! ACME clients write a certificate as several files and renames in quick
//! succession. The first event opens a window; every event arriving before
//! it closes replaces the pending one, and a single event is emitted when the
//! window closes.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::observability::metrics;
use crate::watcher::types::{ChangeEvent, WatchMessage};

/// Collapse bursts from `raw` into single events on `out`.
///
/// Returns when `raw` closes (after flushing any pending event) or when `out`
/// is dropped.
pub async fn debounce(
    mut raw: mpsc::UnboundedReceiver<ChangeEvent>,
    out: mpsc::Sender<WatchMessage>,
    window: Duration,
) {
    while let Some(first) = raw.recv().await {
        let mut latest = first;
        let mut coalesced = 0u32;
        let deadline = Instant::now() + window;
        let mut closed = false;

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                next = raw.recv() => match next {
                    Some(event) => {
                        latest = event;
                        coalesced += 1;
                    }
                    None => {
                        closed = true;
                        break;
                    }
                },
            }
        }

        tracing::debug!(
            kind = latest.kind.as_str(),
            path = %latest.path.display(),
            coalesced,
            "Change detected"
        );
        metrics::record_watch_event(latest.kind);

        if out.send(Ok(latest)).await.is_err() || closed {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::types::WatchKind;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn event(second: u32) -> ChangeEvent {
        ChangeEvent {
            kind: WatchKind::CertificateStore,
            path: PathBuf::from(format!("/store/acme.json.{second}")),
            modified: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_latest() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let task = tokio::spawn(debounce(raw_rx, out_tx, Duration::from_millis(500)));

        raw_tx.send(event(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        raw_tx.send(event(2)).unwrap();

        let emitted = out_rx.recv().await.unwrap().unwrap();
        assert_eq!(emitted, event(2));

        // Nothing else is pending.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(out_rx.try_recv().is_err());

        // A later event opens a new window.
        raw_tx.send(event(3)).unwrap();
        assert_eq!(out_rx.recv().await.unwrap().unwrap(), event(3));

        drop(raw_tx);
        task.await.unwrap();
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_pending_on_close() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::channel(8);

        raw_tx.send(event(1)).unwrap();
        drop(raw_tx);
        debounce(raw_rx, out_tx, Duration::from_millis(500)).await;

        assert_eq!(out_rx.recv().await.unwrap().unwrap(), event(1));
        assert!(out_rx.recv().await.is_none());
    }
}
