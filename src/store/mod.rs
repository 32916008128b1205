//! Certificate store subsystem.
//!
//! # Data Flow
//! ```text
//! store on disk (acme.json | live/ directory)
//!     → CertificateStore::load (format specific)
//!     → pem.rs (PEM decode, X.509 names + validity + fingerprint)
//!     → StoreSnapshot
//!     → extractor.rs (pick a certificate per requested domain)
//!     → CertificateBundle
//! ```
//!
//! # Security Constraints
//! - Private keys stay in `PrivateKeyPem`, which never prints its bytes
//! - Keys are read only so they can be exported next to the chain

pub mod acme_json;
pub mod directory;
pub mod extractor;
pub mod pem;
pub mod types;

use std::path::{Path, PathBuf};

pub use acme_json::AcmeJsonStore;
pub use directory::DirectoryStore;
pub use extractor::extract;
pub use types::{
    CertificateBundle, ExtractError, PrivateKeyPem, StoreError, StoreResult, StoreSnapshot,
    StoredCertificate,
};

use crate::config::{StoreConfig, StoreFormat};

/// A readable certificate store. The on-disk layout stays behind this trait.
pub trait CertificateStore: Send + Sync + std::fmt::Debug {
    /// Path watched for changes.
    fn path(&self) -> &Path;

    /// Read every certificate currently in the store.
    fn load(&self) -> StoreResult<StoreSnapshot>;
}

/// Open a store at `path` using the configured format.
pub fn open_store(path: impl Into<PathBuf>, config: &StoreConfig) -> Box<dyn CertificateStore> {
    let path = path.into();
    let format = match config.format {
        StoreFormat::Auto if path.is_dir() => StoreFormat::Directory,
        StoreFormat::Auto => StoreFormat::AcmeJson,
        other => other,
    };

    tracing::debug!(path = %path.display(), format = ?format, "Opening certificate store");
    match format {
        StoreFormat::Directory => Box::new(DirectoryStore::new(path)),
        _ => Box::new(AcmeJsonStore::new(path, config.resolver.clone())),
    }
}
