//! Watcher event and error types.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// What a change event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WatchKind {
    /// The mapping file changed; reload it before reconciling.
    Mapping,
    /// The certificate store changed.
    CertificateStore,
    /// Requested by an operator (SIGHUP) or at startup.
    Manual,
}

impl WatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchKind::Mapping => "mapping",
            WatchKind::CertificateStore => "certificate_store",
            WatchKind::Manual => "manual",
        }
    }
}

/// A single logical change, after debouncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: WatchKind,
    pub path: PathBuf,
    /// Modification time observed when the event was raised.
    pub modified: DateTime<Utc>,
}

impl ChangeEvent {
    /// Build an event for `path`, reading its modification time.
    pub fn observe(kind: WatchKind, path: &Path) -> Self {
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());
        Self {
            kind,
            path: path.to_path_buf(),
            modified: DateTime::<Utc>::from(modified),
        }
    }

    /// An event not tied to a filesystem change.
    pub fn manual(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: WatchKind::Manual,
            path: path.into(),
            modified: Utc::now(),
        }
    }
}

/// Errors raised by a watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The watched path did not exist when the watch started.
    #[error("watched path {path} does not exist")]
    NotFound { path: PathBuf },

    /// The OS watch could not be registered.
    #[error("failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The path stayed unreadable through the whole retry budget.
    #[error("lost watch on {path} after {attempts} attempts")]
    RetriesExhausted { path: PathBuf, attempts: u32 },
}

/// What watchers put on the reconciliation queue.
pub type WatchMessage = Result<ChangeEvent, WatchError>;
