//! Writer result and error types.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from staging or committing a file. Retryable.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to stage {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to commit {path}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("certificate {fingerprint} referenced by the descriptor is not in the bundle")]
    MissingCertificate { fingerprint: String },
}

/// Errors from the reload hook. Reported, never fatal to a cycle.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("invalid reload url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to spawn reload command: {0}")]
    Spawn(#[source] io::Error),

    #[error("reload hook timed out after {0:?}")]
    Timeout(Duration),

    #[error("reload command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("reload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("reload endpoint answered {status}")]
    HttpStatus { status: u16 },
}

/// Failure of the write half of a cycle.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("certificate export failed: {0}")]
    Export(#[source] WriteError),

    #[error("descriptor write failed: {0}")]
    Write(#[source] WriteError),
}

impl ApplyError {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ApplyError::Export(e) | ApplyError::Write(e) => match e {
                WriteError::Stage { path, .. } | WriteError::Commit { path, .. } => Some(path),
                WriteError::MissingCertificate { .. } => None,
            },
        }
    }
}

/// What a successful apply did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedResult {
    pub digest: String,
    pub path: PathBuf,
    /// The reload hook ran and succeeded. `false` when none is configured.
    pub reloaded: bool,
    /// Why the reload hook failed, if it did.
    pub reload_error: Option<String>,
    /// Certificates whose files were (re)written under the export directory.
    pub exported: usize,
}
