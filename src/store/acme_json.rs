//! Traefik-style `acme.json` certificate store.
//!
//! ```text
//! {
//!   "<resolver>": {
//!     "Account": { ... },
//!     "Certificates": [
//!       { "domain": { "main": "rmm.x.com", "sans": ["api.x.com"] },
//!         "certificate": "<base64 PEM chain>",
//!         "key": "<base64 PEM key>",
//!         "Store": "default" }
//!     ]
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::store::pem::build_certificate;
use crate::store::types::{StoreError, StoreResult, StoreSnapshot, StoredCertificate};
use crate::store::CertificateStore;

#[derive(Debug, Deserialize)]
struct ResolverEntry {
    #[serde(rename = "Certificates", default)]
    certificates: Option<Vec<AcmeCertificate>>,
}

#[derive(Debug, Deserialize)]
struct AcmeCertificate {
    domain: AcmeDomain,
    certificate: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct AcmeDomain {
    main: String,
    #[serde(default)]
    sans: Option<Vec<String>>,
}

/// Reads certificates from a single `acme.json` file.
#[derive(Debug, Clone)]
pub struct AcmeJsonStore {
    path: PathBuf,
    resolver: Option<String>,
}

impl AcmeJsonStore {
    pub fn new(path: impl Into<PathBuf>, resolver: Option<String>) -> Self {
        Self {
            path: path.into(),
            resolver,
        }
    }

    /// Parse an `acme.json` document already read into memory.
    pub fn parse(&self, content: &str) -> StoreResult<StoreSnapshot> {
        // Traefik creates the file empty before the first issuance.
        if content.trim().is_empty() {
            return Ok(StoreSnapshot::default());
        }

        let resolvers: BTreeMap<String, ResolverEntry> =
            serde_json::from_str(content).map_err(|e| StoreError::Parse {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let mut certificates = Vec::new();
        for (resolver, entry) in resolvers {
            if self.resolver.as_deref().is_some_and(|wanted| wanted != resolver) {
                continue;
            }
            for acme in entry.certificates.unwrap_or_default() {
                let label = format!("{}/{}", resolver, acme.domain.main);
                match decode_entry(&label, acme) {
                    Ok(cert) => certificates.push(cert),
                    Err(e) => {
                        tracing::warn!(
                            entry = %label,
                            error = %e,
                            "Skipping unreadable certificate entry"
                        );
                    }
                }
            }
        }

        Ok(StoreSnapshot::new(certificates))
    }
}

fn decode_entry(label: &str, acme: AcmeCertificate) -> StoreResult<StoredCertificate> {
    let decode = |field: &str, value: &str| {
        STANDARD
            .decode(value.trim())
            .map_err(|e| StoreError::InvalidCertificate {
                entry: label.to_string(),
                reason: format!("{} is not valid base64: {}", field, e),
            })
    };

    let chain = decode("certificate", &acme.certificate)?;
    let key = decode("key", &acme.key)?;

    let mut declared = vec![acme.domain.main];
    declared.extend(acme.domain.sans.unwrap_or_default());

    build_certificate(label, chain, key, &declared)
}

impl CertificateStore for AcmeJsonStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoreResult<StoreSnapshot> {
        let content = fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.parse(&content)
    }
}
