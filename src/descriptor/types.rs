//! Route descriptor types and error definitions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use url::Url;

use crate::domain::service_name;

/// One routed domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRoute {
    /// Router and service name, unique within a descriptor.
    pub name: String,
    pub domain: String,
    pub upstream: Url,
    /// Verify the upstream's certificate. `false` renders a serversTransport
    /// with `insecureSkipVerify`.
    pub tls_verify: bool,
    /// Fingerprint of the certificate serving this domain.
    pub certificate: String,
}

/// Exported certificate files referenced from `tls.certificates`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFiles {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl ExportedFiles {
    /// `<export_dir>/<name>/fullchain.pem` and `privkey.pem` for a certificate.
    pub fn under(export_dir: &Path, primary_domain: &str) -> Self {
        let dir = export_dir.join(service_name(primary_domain));
        Self {
            cert_file: dir.join("fullchain.pem"),
            key_file: dir.join("privkey.pem"),
        }
    }
}

/// A certificate the descriptor depends on. Carries no key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRef {
    pub fingerprint: String,
    /// Routed domains served by this certificate, sorted.
    pub domains: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub files: Option<ExportedFiles>,
}

/// Settings rendered into every router and service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderSettings {
    pub entry_points: Vec<String>,
    pub pass_host_header: bool,
}

/// A complete, rendered routing snapshot.
///
/// Built wholesale by the generator; the rendered bytes and their digest are
/// computed once and never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    services: BTreeMap<String, ServiceRoute>,
    certificates: Vec<CertificateRef>,
    rendered: Vec<u8>,
    digest: String,
}

impl RouteDescriptor {
    pub(crate) fn new(
        services: BTreeMap<String, ServiceRoute>,
        certificates: Vec<CertificateRef>,
        rendered: Vec<u8>,
        digest: String,
    ) -> Self {
        Self {
            services,
            certificates,
            rendered,
            digest,
        }
    }

    pub fn services(&self) -> &BTreeMap<String, ServiceRoute> {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ServiceRoute> {
        self.services.get(name)
    }

    pub fn certificates(&self) -> &[CertificateRef] {
        &self.certificates
    }

    /// Serialized Traefik dynamic configuration.
    pub fn bytes(&self) -> &[u8] {
        &self.rendered
    }

    /// SHA-256 of `bytes()`, lowercase hex.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Errors generating a descriptor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerateError {
    #[error("domain {domain} has a certificate but no upstream mapping")]
    UnmappedDomain { domain: String },

    #[error("mapped domain {domain} is not covered by the certificate bundle")]
    DomainNotCovered { domain: String },

    #[error("upstream for {domain} is invalid: {reason}")]
    InvalidUpstream { domain: String, reason: String },

    #[error("upstream scheme {scheme:?} for {domain} is not supported")]
    UnsupportedScheme { domain: String, scheme: String },

    #[error("domains {first} and {second} both map to service {name}")]
    DuplicateService {
        name: String,
        first: String,
        second: String,
    },

    #[error("failed to render descriptor: {0}")]
    Render(String),
}

impl GenerateError {
    pub fn domain(&self) -> Option<&str> {
        match self {
            GenerateError::UnmappedDomain { domain }
            | GenerateError::DomainNotCovered { domain }
            | GenerateError::InvalidUpstream { domain, .. }
            | GenerateError::UnsupportedScheme { domain, .. } => Some(domain),
            GenerateError::DuplicateService { second, .. } => Some(second),
            GenerateError::Render(_) => None,
        }
    }
}
