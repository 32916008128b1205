//! Reconciliation state, outcomes and errors.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::ConfigError;
use crate::descriptor::GenerateError;
use crate::store::{ExtractError, StoreError};
use crate::writer::{AppliedResult, ApplyError, ReloadError};

/// Where the loop is. Only the loop task changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Extracting,
    Generating,
    Writing,
    /// The last cycle failed. Accepts events exactly like `Idle`.
    Degraded,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Extracting => "extracting",
            Phase::Generating => "generating",
            Phase::Writing => "writing",
            Phase::Degraded => "degraded",
        }
    }

    /// Value exported on the phase gauge.
    pub fn code(&self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Extracting => 1,
            Phase::Generating => 2,
            Phase::Writing => 3,
            Phase::Degraded => 4,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was last applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationState {
    last_digest: Option<String>,
    applied_at: Option<DateTime<Utc>>,
}

impl ReconciliationState {
    pub fn last_digest(&self) -> Option<&str> {
        self.last_digest.as_deref()
    }

    pub fn applied_at(&self) -> Option<DateTime<Utc>> {
        self.applied_at
    }

    /// True if `digest` is what the proxy already has.
    pub fn is_current(&self, digest: &str) -> bool {
        self.last_digest.as_deref() == Some(digest)
    }

    pub fn record(&mut self, digest: impl Into<String>, at: DateTime<Utc>) {
        self.last_digest = Some(digest.into());
        self.applied_at = Some(at);
    }
}

/// Result of one successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Applied(AppliedResult),
    /// Generated digest matched the last applied one; nothing was written.
    Unchanged { digest: String },
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Applied(_) => "applied",
            CycleOutcome::Unchanged { .. } => "unchanged",
        }
    }
}

/// The part of a cycle that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Mapping,
    Load,
    Extract,
    Generate,
    Write,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Mapping => "mapping",
            Stage::Load => "load",
            Stage::Extract => "extract",
            Stage::Generate => "generate",
            Stage::Write => "write",
        }
    }
}

/// How a failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying; the environment may recover on its own.
    Transient,
    /// The inputs are wrong. Keep the last good descriptor and wait for a change.
    Data,
    /// Unrecoverable; raised during startup or when a watcher gives up.
    Fatal,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("mapping reload failed: {0}")]
    Mapping(#[source] ConfigError),

    #[error("invalid reload hook: {0}")]
    ReloadHook(#[source] ReloadError),

    #[error("certificate store read failed: {0}")]
    Store(#[source] StoreError),

    #[error("{0}")]
    Extract(#[source] ExtractError),

    #[error("{0}")]
    Generate(#[source] GenerateError),

    #[error("{0}")]
    Apply(#[source] ApplyError),
}

impl CycleError {
    pub fn stage(&self) -> Stage {
        match self {
            CycleError::Mapping(_) | CycleError::ReloadHook(_) => Stage::Mapping,
            CycleError::Store(_) => Stage::Load,
            CycleError::Extract(_) => Stage::Extract,
            CycleError::Generate(_) => Stage::Generate,
            CycleError::Apply(_) => Stage::Write,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            CycleError::Store(e) if e.is_transient() => ErrorClass::Transient,
            CycleError::Apply(_) => ErrorClass::Transient,
            _ => ErrorClass::Data,
        }
    }

    /// Domain the failure is about, when there is one.
    pub fn domain(&self) -> Option<&str> {
        match self {
            CycleError::Extract(e) => e.domain(),
            CycleError::Generate(e) => e.domain(),
            _ => None,
        }
    }
}

impl From<GenerateError> for CycleError {
    fn from(err: GenerateError) -> Self {
        CycleError::Generate(err)
    }
}

impl From<ApplyError> for CycleError {
    fn from(err: ApplyError) -> Self {
        CycleError::Apply(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    #[test]
    fn test_state_tracks_last_digest() {
        let mut state = ReconciliationState::default();
        assert!(!state.is_current("abc"));

        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        state.record("abc", at);
        assert!(state.is_current("abc"));
        assert!(!state.is_current("def"));
        assert_eq!(state.applied_at(), Some(at));
    }

    #[test]
    fn test_error_classes() {
        let io = CycleError::Store(StoreError::Io {
            path: PathBuf::from("/acme.json"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "busy"),
        });
        assert_eq!(io.class(), ErrorClass::Transient);
        assert_eq!(io.stage(), Stage::Load);

        let parse = CycleError::Store(StoreError::Parse {
            path: PathBuf::from("/acme.json"),
            reason: "eof".into(),
        });
        assert_eq!(parse.class(), ErrorClass::Data);

        let uncovered = CycleError::Extract(ExtractError::DomainNotCovered {
            domain: "db.x.com".into(),
        });
        assert_eq!(uncovered.class(), ErrorClass::Data);
        assert_eq!(uncovered.domain(), Some("db.x.com"));
        assert_eq!(uncovered.stage(), Stage::Extract);
    }
}
