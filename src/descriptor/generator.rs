//! Route descriptor generation.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::validation::{check_upstream, ValidationError};
use crate::config::MappingConfig;
use crate::descriptor::render::{digest, render};
use crate::descriptor::types::{
    CertificateRef, ExportedFiles, GenerateError, RenderSettings, RouteDescriptor, ServiceRoute,
};
use crate::domain::{normalize_domain, service_name};
use crate::store::CertificateBundle;

/// Build the descriptor for a bundle and its mapping.
///
/// Pure: equal inputs always render byte-identical output. Every bundle domain
/// must be mapped, and every mapped domain must be covered by the bundle.
pub fn generate(
    bundle: &CertificateBundle,
    mapping: &MappingConfig,
) -> Result<RouteDescriptor, GenerateError> {
    for domain in bundle.domains() {
        if mapping.route_for(domain).is_none() {
            return Err(GenerateError::UnmappedDomain {
                domain: domain.clone(),
            });
        }
    }

    let mut services: BTreeMap<String, ServiceRoute> = BTreeMap::new();
    let mut served: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for route in &mapping.routes {
        let domain = normalize_domain(&route.domain);
        let certificate = bundle
            .certificate_for(&domain)
            .ok_or_else(|| GenerateError::DomainNotCovered {
                domain: domain.clone(),
            })?;

        let upstream = check_upstream(&domain, &route.upstream).map_err(upstream_error)?;

        let name = service_name(&domain);
        if let Some(existing) = services.get(&name) {
            return Err(GenerateError::DuplicateService {
                name,
                first: existing.domain.clone(),
                second: domain,
            });
        }

        served
            .entry(certificate.fingerprint.clone())
            .or_default()
            .insert(domain.clone());
        services.insert(
            name.clone(),
            ServiceRoute {
                name,
                domain,
                upstream,
                tls_verify: route.tls_verify,
                certificate: certificate.fingerprint.clone(),
            },
        );
    }

    let mut certificates: Vec<CertificateRef> = bundle
        .certificates()
        .iter()
        .filter_map(|cert| {
            served.get(&cert.fingerprint).map(|domains| CertificateRef {
                fingerprint: cert.fingerprint.clone(),
                domains: domains.iter().cloned().collect(),
                expires_at: cert.expires_at,
                files: None,
            })
        })
        .collect();
    certificates.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

    if let Some(export_dir) = &mapping.proxy.export_dir {
        let mut labels = HashSet::new();
        for cert in &mut certificates {
            // Name the export directory after the first routed domain it serves.
            let primary = cert.domains.first().cloned().unwrap_or_default();
            let mut label = service_name(&primary);
            if !labels.insert(label.clone()) {
                label = format!("{}-{}", label, &cert.fingerprint[..cert.fingerprint.len().min(8)]);
                labels.insert(label.clone());
            }
            cert.files = Some(ExportedFiles::under(export_dir, &label));
        }
    }

    let settings = RenderSettings {
        entry_points: mapping.proxy.entry_points.clone(),
        pass_host_header: mapping.proxy.pass_host_header,
    };
    let rendered = render(&services, &certificates, &settings)
        .map_err(|e| GenerateError::Render(e.to_string()))?;
    let digest = digest(&rendered);

    Ok(RouteDescriptor::new(services, certificates, rendered, digest))
}

fn upstream_error(err: ValidationError) -> GenerateError {
    match err {
        ValidationError::UnsupportedScheme { domain, scheme } => {
            GenerateError::UnsupportedScheme { domain, scheme }
        }
        ValidationError::InvalidUpstream { domain, reason, .. } => {
            GenerateError::InvalidUpstream { domain, reason }
        }
        ValidationError::MissingHost { domain } => GenerateError::InvalidUpstream {
            domain,
            reason: "no host".to_string(),
        },
        other => GenerateError::InvalidUpstream {
            domain: String::new(),
            reason: other.to_string(),
        },
    }
}
