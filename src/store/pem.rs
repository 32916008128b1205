//! PEM decoding and X.509 leaf inspection.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

use crate::domain::normalize_domain;
use crate::store::types::{PrivateKeyPem, StoreError, StoreResult, StoredCertificate};

/// Metadata read from the leaf of a PEM chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafInfo {
    pub domains: Vec<String>,
    pub fingerprint: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Decode a PEM chain and inspect its first certificate.
pub fn inspect_chain(entry: &str, chain_pem: &[u8]) -> StoreResult<LeafInfo> {
    let invalid = |reason: String| StoreError::InvalidCertificate {
        entry: entry.to_string(),
        reason,
    };

    let mut reader = chain_pem;
    let leaf = rustls_pemfile::certs(&mut reader)
        .next()
        .ok_or_else(|| invalid("no certificate in PEM data".to_string()))?
        .map_err(|e| invalid(e.to_string()))?;

    let (_, cert) =
        parse_x509_certificate(leaf.as_ref()).map_err(|e| invalid(e.to_string()))?;

    let mut domains: Vec<String> = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                push_unique(&mut domains, dns);
            }
        }
    }
    if domains.is_empty() {
        for cn in cert.subject().iter_common_name() {
            if let Ok(cn) = cn.as_str() {
                push_unique(&mut domains, cn);
            }
        }
    }

    let validity = cert.validity();
    let not_before = to_datetime(validity.not_before.timestamp())
        .ok_or_else(|| invalid("notBefore out of range".to_string()))?;
    let not_after = to_datetime(validity.not_after.timestamp())
        .ok_or_else(|| invalid("notAfter out of range".to_string()))?;

    Ok(LeafInfo {
        domains,
        fingerprint: hex::encode(Sha256::digest(leaf.as_ref())),
        not_before,
        not_after,
    })
}

/// Check that the PEM data contains a private key.
pub fn check_private_key(entry: &str, key_pem: &[u8]) -> StoreResult<()> {
    let mut reader = key_pem;
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(StoreError::MissingPrivateKey {
            entry: entry.to_string(),
        }),
        Err(e) => Err(StoreError::InvalidCertificate {
            entry: entry.to_string(),
            reason: format!("unreadable private key: {}", e),
        }),
    }
}

/// Build a store entry from raw PEM chain and key bytes.
///
/// `fallback_domains` is used only when the leaf carries no names at all.
pub fn build_certificate(
    entry: impl Into<String>,
    chain_pem: Vec<u8>,
    key_pem: Vec<u8>,
    fallback_domains: &[String],
) -> StoreResult<StoredCertificate> {
    let entry = entry.into();
    let leaf = inspect_chain(&entry, &chain_pem)?;
    check_private_key(&entry, &key_pem)?;

    let mut domains = leaf.domains;
    if domains.is_empty() {
        for name in fallback_domains {
            push_unique(&mut domains, name);
        }
    }
    if domains.is_empty() {
        return Err(StoreError::InvalidCertificate {
            entry,
            reason: "certificate names no domains".to_string(),
        });
    }

    Ok(StoredCertificate {
        entry,
        domains,
        chain_pem,
        key: PrivateKeyPem::new(key_pem),
        fingerprint: leaf.fingerprint,
        issued_at: leaf.not_before,
        expires_at: leaf.not_after,
    })
}

fn push_unique(domains: &mut Vec<String>, name: &str) {
    let name = normalize_domain(name);
    if !name.is_empty() && !domains.contains(&name) {
        domains.push(name);
    }
}

fn to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
