//! Mapping validation.
//!
//! Serde handles syntax; this checks semantics and returns every problem found,
//! not just the first.

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::MappingConfig;
use crate::domain::normalize_domain;

/// Upstream schemes the proxy can forward to.
pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "h2c"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("mapping defines no routes")]
    NoRoutes,

    #[error("route #{index} has an empty domain")]
    EmptyDomain { index: usize },

    #[error("domain {domain} is mapped more than once")]
    DuplicateDomain { domain: String },

    #[error("upstream {upstream:?} for {domain} is not a valid URL: {reason}")]
    InvalidUpstream {
        domain: String,
        upstream: String,
        reason: String,
    },

    #[error("upstream scheme {scheme:?} for {domain} is not supported")]
    UnsupportedScheme { domain: String, scheme: String },

    #[error("upstream for {domain} has no host")]
    MissingHost { domain: String },

    #[error("reload hook sets both command and url")]
    AmbiguousReload,
}

/// Validate a mapping document.
pub fn validate_mapping(mapping: &MappingConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if mapping.routes.is_empty() {
        errors.push(ValidationError::NoRoutes);
    }

    let mut seen = HashSet::new();
    for (index, route) in mapping.routes.iter().enumerate() {
        let domain = normalize_domain(&route.domain);
        if domain.is_empty() {
            errors.push(ValidationError::EmptyDomain { index });
            continue;
        }
        if !seen.insert(domain.clone()) {
            errors.push(ValidationError::DuplicateDomain {
                domain: domain.clone(),
            });
        }
        if let Err(e) = check_upstream(&domain, &route.upstream) {
            errors.push(e);
        }
    }

    if mapping.reload.command.is_some() && mapping.reload.url.is_some() {
        errors.push(ValidationError::AmbiguousReload);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse an upstream URL and check the scheme and host.
pub fn check_upstream(domain: &str, upstream: &str) -> Result<Url, ValidationError> {
    let url = Url::parse(upstream).map_err(|e| ValidationError::InvalidUpstream {
        domain: domain.to_string(),
        upstream: upstream.to_string(),
        reason: e.to_string(),
    })?;

    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(ValidationError::UnsupportedScheme {
            domain: domain.to_string(),
            scheme: url.scheme().to_string(),
        });
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::MissingHost {
            domain: domain.to_string(),
        });
    }
    Ok(url)
}
