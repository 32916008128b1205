//! File watching for the certificate store and the mapping file.
//!
//! # Data Flow
//! ```text
//! notify callback (OS thread)
//!     → supervisor task (filter, check path, recover lost watch with backoff)
//!     → debounce.rs (collapse bursts)
//!     → shared reconciliation queue (WatchMessage)
//! ```
//!
//! # Design Decisions
//! - Files are watched through their parent directory so rename-over writes
//!   are seen; directories are watched recursively
//! - A missing path at start is an error; a path lost mid-run is retried
//!   until the budget runs out, then `RetriesExhausted` ends the watch
//! - Dropping the handle stops the watch

pub mod debounce;
pub mod types;

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::WatchConfig;
use crate::resilience::BackoffPolicy;

pub use types::{ChangeEvent, WatchError, WatchKind, WatchMessage};

/// Signals from the notify callback to the supervisor.
#[derive(Debug)]
enum RawSignal {
    Touched,
    Failed(String),
}

/// Watches one path and reports debounced changes.
#[derive(Debug, Clone)]
pub struct CertificateWatcher {
    path: PathBuf,
    kind: WatchKind,
    config: WatchConfig,
}

/// Keeps a running watch alive; dropping it stops the watch.
#[derive(Debug)]
pub struct WatchHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A lazily evaluated, unbounded stream of changes for a single watcher.
#[derive(Debug)]
pub struct WatchStream {
    rx: mpsc::Receiver<WatchMessage>,
    _handle: WatchHandle,
}

impl WatchStream {
    /// Next change, or the error that ended the watch. `None` once stopped.
    pub async fn next(&mut self) -> Option<WatchMessage> {
        self.rx.recv().await
    }
}

impl CertificateWatcher {
    pub fn new(path: impl Into<PathBuf>, kind: WatchKind, config: WatchConfig) -> Self {
        Self {
            path: path.into(),
            kind,
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start watching with a private queue.
    pub fn watch(self) -> Result<WatchStream, WatchError> {
        let (tx, rx) = mpsc::channel(16);
        let handle = self.spawn(tx)?;
        Ok(WatchStream {
            rx,
            _handle: handle,
        })
    }

    /// Start watching, feeding `queue`. Several watchers may share one queue.
    pub fn spawn(self, queue: mpsc::Sender<WatchMessage>) -> Result<WatchHandle, WatchError> {
        if !self.path.exists() {
            return Err(WatchError::NotFound { path: self.path });
        }

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let watcher = register(&self.path, signal_tx.clone())?;

        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let window = Duration::from_millis(self.config.debounce_ms);
        let debouncer = tokio::spawn(debounce::debounce(change_rx, queue.clone(), window));

        tracing::info!(
            path = %self.path.display(),
            kind = self.kind.as_str(),
            debounce_ms = self.config.debounce_ms,
            "Watcher started"
        );

        let supervisor =
            tokio::spawn(self.supervise(watcher, signal_tx, signal_rx, change_tx, queue));

        Ok(WatchHandle {
            tasks: vec![supervisor, debouncer],
        })
    }

    async fn supervise(
        self,
        mut watcher: RecommendedWatcher,
        signal_tx: mpsc::UnboundedSender<RawSignal>,
        mut signals: mpsc::UnboundedReceiver<RawSignal>,
        changes: mpsc::UnboundedSender<ChangeEvent>,
        queue: mpsc::Sender<WatchMessage>,
    ) {
        let policy = BackoffPolicy::from(&self.config);

        while let Some(signal) = signals.recv().await {
            let healthy = match signal {
                RawSignal::Touched => self.path.exists(),
                RawSignal::Failed(reason) => {
                    tracing::warn!(path = %self.path.display(), error = %reason, "Watch error");
                    false
                }
            };

            if healthy {
                if changes.send(ChangeEvent::observe(self.kind, &self.path)).is_err() {
                    return;
                }
                continue;
            }

            // Path vanished or the OS watch broke: wait for it to come back.
            match self.recover(&policy, &signal_tx).await {
                Some(replacement) => {
                    watcher = replacement;
                    if changes.send(ChangeEvent::observe(self.kind, &self.path)).is_err() {
                        return;
                    }
                }
                None => {
                    let _ = queue
                        .send(Err(WatchError::RetriesExhausted {
                            path: self.path.clone(),
                            attempts: policy.max_attempts,
                        }))
                        .await;
                    return;
                }
            }
        }

        drop(watcher);
    }

    async fn recover(
        &self,
        policy: &BackoffPolicy,
        signal_tx: &mpsc::UnboundedSender<RawSignal>,
    ) -> Option<RecommendedWatcher> {
        for attempt in 1..=policy.max_attempts {
            let delay = policy.delay(attempt);
            tracing::warn!(
                path = %self.path.display(),
                attempt,
                delay = ?delay,
                "Watched path unavailable, retrying"
            );
            tokio::time::sleep(delay).await;

            if !self.path.exists() {
                continue;
            }
            match register(&self.path, signal_tx.clone()) {
                Ok(watcher) => {
                    tracing::info!(path = %self.path.display(), attempt, "Watch re-established");
                    return Some(watcher);
                }
                Err(e) => tracing::warn!(error = %e, "Failed to re-register watch"),
            }
        }

        tracing::error!(path = %self.path.display(), "Watched path did not come back");
        None
    }
}

/// Register an OS watch for `path`, sending signals to `tx`.
fn register(
    path: &Path,
    tx: mpsc::UnboundedSender<RawSignal>,
) -> Result<RecommendedWatcher, WatchError> {
    let notify_err = |source: notify::Error| WatchError::Notify {
        path: path.to_path_buf(),
        source,
    };

    let (target, mode) = if path.is_dir() {
        (path.to_path_buf(), RecursiveMode::Recursive)
    } else {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        (parent, RecursiveMode::NonRecursive)
    };

    let watched_file = if path.is_dir() {
        None
    } else {
        path.file_name().map(|n| n.to_os_string())
    };

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let relevant_kind = event.kind.is_modify()
                    || event.kind.is_create()
                    || event.kind.is_remove();
                let relevant_path = match &watched_file {
                    Some(name) => event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(name.as_os_str())),
                    None => true,
                };
                if relevant_kind && relevant_path {
                    let _ = tx.send(RawSignal::Touched);
                }
            }
            Err(e) => {
                let _ = tx.send(RawSignal::Failed(e.to_string()));
            }
        },
        Config::default().with_poll_interval(Duration::from_secs(2)),
    )
    .map_err(notify_err)?;

    watcher.watch(&target, mode).map_err(notify_err)?;
    Ok(watcher)
}
