//! Directory certificate store (certbot `live/` layout).
//!
//! Each sub-directory holds one certificate: `fullchain.pem` (or `cert.pem`,
//! `tls.crt`) next to `privkey.pem` (or `tls.key`). A root that itself holds
//! those files is read as a single certificate.

use std::fs;
use std::path::{Path, PathBuf};

use crate::store::pem::build_certificate;
use crate::store::types::{StoreError, StoreResult, StoreSnapshot};
use crate::store::CertificateStore;

const CHAIN_FILES: &[&str] = &["fullchain.pem", "cert.pem", "tls.crt"];
const KEY_FILES: &[&str] = &["privkey.pem", "tls.key"];

#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_file(path: &Path) -> StoreResult<Vec<u8>> {
        fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Chain and key file paths in `dir`, if both exist.
    fn pair_in(dir: &Path) -> Option<(PathBuf, PathBuf)> {
        let chain = CHAIN_FILES.iter().map(|f| dir.join(f)).find(|p| p.is_file())?;
        let key = KEY_FILES.iter().map(|f| dir.join(f)).find(|p| p.is_file())?;
        Some((chain, key))
    }
}

impl CertificateStore for DirectoryStore {
    fn path(&self) -> &Path {
        &self.root
    }

    fn load(&self) -> StoreResult<StoreSnapshot> {
        if let Some((chain, key)) = Self::pair_in(&self.root) {
            let entry = self.root.display().to_string();
            let cert =
                build_certificate(entry, Self::read_file(&chain)?, Self::read_file(&key)?, &[])?;
            return Ok(StoreSnapshot::new(vec![cert]));
        }

        let listing = fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut dirs: Vec<PathBuf> = listing
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        let mut certificates = Vec::new();
        for dir in dirs {
            let Some((chain, key)) = Self::pair_in(&dir) else {
                tracing::debug!(dir = %dir.display(), "No certificate pair, skipping");
                continue;
            };
            let entry = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir.display().to_string());

            let result = Self::read_file(&chain).and_then(|chain_pem| {
                let key_pem = Self::read_file(&key)?;
                build_certificate(entry.clone(), chain_pem, key_pem, &[entry.clone()])
            });
            match result {
                Ok(cert) => certificates.push(cert),
                // A half-written renewal is transient; surface it so the cycle retries.
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        entry = %entry,
                        error = %e,
                        "Skipping unreadable certificate entry"
                    );
                }
            }
        }

        Ok(StoreSnapshot::new(certificates))
    }
}
