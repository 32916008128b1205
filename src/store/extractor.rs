//! Certificate selection for a domain set.

use chrono::{DateTime, Utc};

use crate::domain::normalize_domain;
use crate::store::types::{CertificateBundle, ExtractError, StoreSnapshot, StoredCertificate};

/// Select certificate material for `domains` from a store snapshot.
///
/// For each domain the most recently issued certificate that covers it and is
/// valid at `now` wins. Duplicate domains are collapsed, keeping first order.
pub fn extract(
    snapshot: StoreSnapshot,
    domains: &[String],
    now: DateTime<Utc>,
) -> Result<CertificateBundle, ExtractError> {
    let mut requested: Vec<String> = Vec::with_capacity(domains.len());
    for domain in domains {
        let domain = normalize_domain(domain);
        if !domain.is_empty() && !requested.contains(&domain) {
            requested.push(domain);
        }
    }
    if requested.is_empty() {
        return Err(ExtractError::NoDomains);
    }

    let mut chosen_indices: Vec<usize> = Vec::new();
    let mut assignments = Vec::with_capacity(requested.len());

    for domain in &requested {
        let index = select(&snapshot.certificates, domain, now)?;
        let slot = match chosen_indices.iter().position(|&i| i == index) {
            Some(slot) => slot,
            None => {
                chosen_indices.push(index);
                chosen_indices.len() - 1
            }
        };
        assignments.push(slot);
    }

    // Move the selected entries out of the snapshot; the rest are dropped.
    let mut pool: Vec<Option<StoredCertificate>> =
        snapshot.certificates.into_iter().map(Some).collect();
    let certificates = chosen_indices
        .iter()
        .filter_map(|&i| pool[i].take())
        .collect();

    Ok(CertificateBundle::new(requested, certificates, assignments))
}

fn select(
    certificates: &[StoredCertificate],
    domain: &str,
    now: DateTime<Utc>,
) -> Result<usize, ExtractError> {
    let covering = move || {
        certificates
            .iter()
            .enumerate()
            .filter(move |(_, cert)| cert.covers(domain))
    };

    if let Some((index, _)) = covering()
        .filter(|(_, cert)| cert.is_valid_at(now))
        .max_by_key(|(_, cert)| (cert.issued_at, cert.expires_at))
    {
        return Ok(index);
    }

    match covering()
        .filter(|(_, cert)| cert.is_expired_at(now))
        .map(|(_, cert)| cert.expires_at)
        .max()
    {
        Some(expired_at) => Err(ExtractError::ExpiredCertificate {
            domain: domain.to_string(),
            expired_at,
        }),
        None => Err(ExtractError::DomainNotCovered {
            domain: domain.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::PrivateKeyPem;
    use chrono::TimeZone;

    fn at(year: i32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
    }

    fn cert(
        fingerprint: &str,
        domains: &[&str],
        issued: DateTime<Utc>,
        expires: DateTime<Utc>,
    ) -> StoredCertificate {
        StoredCertificate {
            entry: fingerprint.into(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
            chain_pem: Vec::new(),
            key: PrivateKeyPem::new(Vec::new()),
            fingerprint: fingerprint.into(),
            issued_at: issued,
            expires_at: expires,
        }
    }

    fn domains(names: &[&str]) -> Vec<String> {
        names.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_single_san_certificate() {
        let snapshot = StoreSnapshot::new(vec![cert(
            "san",
            &["rmm.x.com", "api.x.com", "mesh.x.com"],
            at(2024, 1),
            at(2024, 4),
        )]);

        let wanted = domains(&["rmm.x.com", "API.x.com", "mesh.x.com"]);
        let bundle = extract(snapshot, &wanted, at(2024, 2)).unwrap();
        assert_eq!(bundle.domains(), &["rmm.x.com", "api.x.com", "mesh.x.com"]);
        assert_eq!(bundle.certificates().len(), 1);
        assert_eq!(bundle.certificate_for("mesh.x.com").unwrap().fingerprint, "san");
    }

    #[test]
    fn test_prefers_most_recent_valid() {
        let snapshot = StoreSnapshot::new(vec![
            cert("old", &["rmm.x.com"], at(2024, 1), at(2024, 4)),
            cert("new", &["rmm.x.com"], at(2024, 3), at(2024, 6)),
            cert("future", &["rmm.x.com"], at(2024, 5), at(2024, 8)),
        ]);

        let bundle = extract(snapshot, &domains(&["rmm.x.com"]), at(2024, 3)).unwrap();
        assert_eq!(bundle.certificate_for("rmm.x.com").unwrap().fingerprint, "new");
        assert_eq!(bundle.issued_at(), at(2024, 3));
        assert_eq!(bundle.expires_at(), at(2024, 6));
    }

    #[test]
    fn test_mixed_certificates() {
        let snapshot = StoreSnapshot::new(vec![
            cert("wild", &["*.x.com"], at(2024, 1), at(2024, 4)),
            cert("apex", &["x.com"], at(2024, 1), at(2024, 3)),
        ]);

        let wanted = domains(&["x.com", "api.x.com", "mesh.x.com"]);
        let bundle = extract(snapshot, &wanted, at(2024, 2)).unwrap();
        assert_eq!(bundle.certificates().len(), 2);
        assert_eq!(bundle.certificate_for("api.x.com").unwrap().fingerprint, "wild");
        assert_eq!(bundle.certificate_for("x.com").unwrap().fingerprint, "apex");
        assert_eq!(bundle.expires_at(), at(2024, 3));
    }

    #[test]
    fn test_expired_only_match() {
        let snapshot = StoreSnapshot::new(vec![
            cert("ok", &["rmm.x.com"], at(2024, 1), at(2024, 12)),
            cert("stale", &["api.x.com"], at(2023, 1), at(2023, 4)),
        ]);

        let err =
            extract(snapshot, &domains(&["rmm.x.com", "api.x.com"]), at(2024, 2)).unwrap_err();
        assert_eq!(
            err,
            ExtractError::ExpiredCertificate {
                domain: "api.x.com".into(),
                expired_at: at(2023, 4),
            }
        );
    }

    #[test]
    fn test_not_covered() {
        let snapshot =
            StoreSnapshot::new(vec![cert("ok", &["rmm.x.com"], at(2024, 1), at(2024, 12))]);

        let err = extract(snapshot, &domains(&["rmm.x.com", "db.x.com"]), at(2024, 2)).unwrap_err();
        assert_eq!(err, ExtractError::DomainNotCovered { domain: "db.x.com".into() });
    }

    #[test]
    fn test_no_domains() {
        let err = extract(StoreSnapshot::default(), &[], at(2024, 1)).unwrap_err();
        assert_eq!(err, ExtractError::NoDomains);
    }
}
