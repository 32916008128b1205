//! Traefik dynamic configuration rendering.
//!
//! Output is TOML for Traefik's file provider. Every map is a `BTreeMap` and
//! nothing time-dependent is rendered, so equal inputs give equal bytes.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::descriptor::types::{CertificateRef, RenderSettings, ServiceRoute};

#[derive(Serialize)]
struct DynamicConfig<'a> {
    http: HttpSection<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<TlsSection>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpSection<'a> {
    routers: BTreeMap<&'a str, Router<'a>>,
    services: BTreeMap<&'a str, Service>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    servers_transports: BTreeMap<String, ServersTransport>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Router<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    entry_points: Vec<String>,
    rule: String,
    service: &'a str,
    tls: RouterTls,
}

/// Empty table: terminate TLS with the store's certificates.
#[derive(Serialize)]
struct RouterTls {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Service {
    load_balancer: LoadBalancer,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadBalancer {
    pass_host_header: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    servers_transport: Option<String>,
    servers: Vec<Server>,
}

#[derive(Serialize)]
struct Server {
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServersTransport {
    insecure_skip_verify: bool,
}

#[derive(Serialize)]
struct TlsSection {
    certificates: Vec<TlsCertificate>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TlsCertificate {
    cert_file: String,
    key_file: String,
}

/// Router rule matching a domain. Wildcards match exactly one label.
pub fn host_rule(domain: &str) -> String {
    match domain.strip_prefix("*.") {
        Some(parent) => format!("HostRegexp(`^[^.]+\\.{}$`)", parent.replace('.', "\\.")),
        None => format!("Host(`{}`)", domain),
    }
}

fn transport_name(service: &str) -> String {
    format!("{}-transport", service)
}

/// Render services and certificates to TOML, with a comment header naming
/// each certificate so renewals change the output.
pub fn render(
    services: &BTreeMap<String, ServiceRoute>,
    certificates: &[CertificateRef],
    settings: &RenderSettings,
) -> Result<Vec<u8>, toml::ser::Error> {
    let mut routers = BTreeMap::new();
    let mut lb_services = BTreeMap::new();
    let mut transports = BTreeMap::new();

    for (name, route) in services {
        routers.insert(
            name.as_str(),
            Router {
                entry_points: settings.entry_points.clone(),
                rule: host_rule(&route.domain),
                service: name.as_str(),
                tls: RouterTls {},
            },
        );

        let servers_transport = if route.tls_verify {
            None
        } else {
            let transport = transport_name(name);
            transports.insert(
                transport.clone(),
                ServersTransport {
                    insecure_skip_verify: true,
                },
            );
            Some(transport)
        };

        lb_services.insert(
            name.as_str(),
            Service {
                load_balancer: LoadBalancer {
                    pass_host_header: settings.pass_host_header,
                    servers_transport,
                    servers: vec![Server {
                        url: route.upstream.to_string(),
                    }],
                },
            },
        );
    }

    let exported: Vec<TlsCertificate> = certificates
        .iter()
        .filter_map(|c| c.files.as_ref())
        .map(|files| TlsCertificate {
            cert_file: files.cert_file.display().to_string(),
            key_file: files.key_file.display().to_string(),
        })
        .collect();

    let config = DynamicConfig {
        http: HttpSection {
            routers,
            services: lb_services,
            servers_transports: transports,
        },
        tls: (!exported.is_empty()).then_some(TlsSection {
            certificates: exported,
        }),
    };

    let body = toml::to_string(&config)?;

    let mut out = String::with_capacity(body.len() + 256);
    out.push_str("# Generated by proxy-reconciler. Manual edits are overwritten.\n");
    for cert in certificates {
        let _ = writeln!(
            out,
            "# certificate {} expires {} covers {}",
            cert.fingerprint,
            cert.expires_at.to_rfc3339(),
            cert.domains.join(", ")
        );
    }
    out.push('\n');
    out.push_str(&body);

    Ok(out.into_bytes())
}

/// SHA-256 of rendered bytes, lowercase hex.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
