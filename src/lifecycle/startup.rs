//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate the mapping file
//! - Open the certificate store
//! - Start the watchers and queue the initial reconciliation
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Watchers start before the initial cycle so no change is missed

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{load_mapping, ConfigError, ReconcilerConfig};
use crate::reconcile::{ErrorClass, Reconciler};
use crate::resilience::BackoffPolicy;
use crate::store::open_store;
use crate::watcher::{
    CertificateWatcher, ChangeEvent, WatchError, WatchHandle, WatchKind, WatchMessage,
};
use crate::writer::{DescriptorWriter, ReloadError};

/// Capacity of the watch queue.
pub const QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("certificate store {path} does not exist")]
    MissingStore { path: PathBuf },

    #[error("failed to load mapping {path}: {source}")]
    Mapping {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error("invalid reload hook: {0}")]
    Reload(#[from] ReloadError),

    #[error("failed to start watcher: {0}")]
    Watch(#[from] WatchError),
}

impl StartupError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Fatal
    }
}

/// Everything `run` needs once startup succeeded.
#[derive(Debug)]
pub struct Runtime {
    pub reconciler: Reconciler,
    pub watchers: Vec<WatchHandle>,
    pub queue_tx: mpsc::Sender<WatchMessage>,
    pub queue_rx: mpsc::Receiver<WatchMessage>,
}

/// Build a reconciler from runtime settings without starting any task.
pub fn build_reconciler(config: &ReconcilerConfig) -> Result<Reconciler, StartupError> {
    if !config.cert_store.exists() {
        return Err(StartupError::MissingStore {
            path: config.cert_store.clone(),
        });
    }

    let mapping = load_mapping(&config.mapping_path).map_err(|source| StartupError::Mapping {
        path: config.mapping_path.clone(),
        source,
    })?;
    tracing::info!(
        path = %config.mapping_path.display(),
        routes = mapping.routes.len(),
        "Mapping loaded"
    );

    let store = open_store(&config.cert_store, &config.store);
    tracing::info!(path = %store.path().display(), store = ?store, "Certificate store opened");

    let reload = mapping.reload.merged_with(&config.reload);
    let writer = DescriptorWriter::from_config(&config.out, &reload, &config.retries)?;

    Ok(Reconciler::new(store, mapping, writer)
        .with_mapping_path(&config.mapping_path, config.reload.clone())
        .with_export_dir(config.export_dir.clone())
        .with_store_retries(BackoffPolicy::from(&config.retries)))
}

/// Build the reconciler, start the watchers and queue the initial cycle.
pub fn start(config: &ReconcilerConfig) -> Result<Runtime, StartupError> {
    let reconciler = build_reconciler(config)?;
    let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);

    let mut watchers = vec![CertificateWatcher::new(
        &config.cert_store,
        WatchKind::CertificateStore,
        config.watch.clone(),
    )
    .spawn(queue_tx.clone())?];

    if config.watch_mapping {
        watchers.push(
            CertificateWatcher::new(&config.mapping_path, WatchKind::Mapping, config.watch.clone())
                .spawn(queue_tx.clone())?,
        );
    }

    // Fresh queue with spare capacity: this cannot fail.
    let _ = queue_tx.try_send(Ok(ChangeEvent::manual(&config.mapping_path)));

    tracing::info!(
        store = %config.cert_store.display(),
        out = %config.out.display(),
        watchers = watchers.len(),
        "Startup complete"
    );

    Ok(Runtime {
        reconciler,
        watchers,
        queue_tx,
        queue_rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_store_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReconcilerConfig {
            cert_store: dir.path().join("acme.json"),
            mapping_path: dir.path().join("mapping.toml"),
            out: dir.path().join("dynamic.toml"),
            ..ReconcilerConfig::default()
        };

        let err = build_reconciler(&config).unwrap_err();
        assert!(matches!(err, StartupError::MissingStore { .. }));
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_bad_mapping_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("acme.json");
        let mapping = dir.path().join("mapping.toml");
        std::fs::write(&store, "").unwrap();
        std::fs::write(&mapping, "[[routes]]\ndomain = \"\"\nupstream = \"ftp://x\"\n").unwrap();

        let config = ReconcilerConfig {
            cert_store: store,
            mapping_path: mapping,
            out: dir.path().join("dynamic.toml"),
            ..ReconcilerConfig::default()
        };
        assert!(matches!(
            build_reconciler(&config).unwrap_err(),
            StartupError::Mapping { .. }
        ));
    }
}
