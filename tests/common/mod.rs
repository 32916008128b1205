//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rcgen::{CertificateParams, KeyPair};
use serde_json::json;
use tempfile::TempDir;

use proxy_reconciler::config::{ReconcilerConfig, RetryConfig, WatchConfig};
use proxy_reconciler::lifecycle::startup;
use proxy_reconciler::reconcile::Reconciler;

/// PEM chain and key for one issued certificate.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub names: Vec<String>,
    pub chain: String,
    pub key: String,
}

fn issue(names: &[&str], not_before: (i32, u8, u8), not_after: (i32, u8, u8)) -> IssuedCertificate {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let mut params = CertificateParams::new(names.clone()).unwrap();
    params.not_before = rcgen::date_time_ymd(not_before.0, not_before.1, not_before.2);
    params.not_after = rcgen::date_time_ymd(not_after.0, not_after.1, not_after.2);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    IssuedCertificate {
        names,
        chain: cert.pem(),
        key: key.serialize_pem(),
    }
}

/// A certificate valid from 2024 until far in the future.
pub fn valid_certificate(names: &[&str]) -> IssuedCertificate {
    issue(names, (2024, 1, 1), (2099, 1, 1))
}

/// Like [`valid_certificate`], issued a day later.
pub fn renewed_certificate(names: &[&str]) -> IssuedCertificate {
    issue(names, (2024, 1, 2), (2099, 1, 1))
}

/// A certificate that expired in 2021.
pub fn expired_certificate(names: &[&str]) -> IssuedCertificate {
    issue(names, (2020, 1, 1), (2021, 1, 1))
}

/// Write a Traefik `acme.json` holding `certificates` under one resolver.
pub fn write_acme_json(path: &Path, resolver: &str, certificates: &[IssuedCertificate]) {
    let entries: Vec<_> = certificates
        .iter()
        .map(|c| {
            json!({
                "domain": { "main": c.names[0], "sans": c.names[1..] },
                "certificate": STANDARD.encode(&c.chain),
                "key": STANDARD.encode(&c.key),
                "Store": "default",
            })
        })
        .collect();
    let mut document = serde_json::Map::new();
    document.insert(
        resolver.to_string(),
        json!({
            "Account": { "Email": "ops@x.com" },
            "Certificates": entries,
        }),
    );
    std::fs::write(path, serde_json::to_vec_pretty(&document).unwrap()).unwrap();
}

/// Write a certbot-style `live/<name>/` entry.
pub fn write_live_entry(root: &Path, name: &str, certificate: &IssuedCertificate) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("fullchain.pem"), &certificate.chain).unwrap();
    std::fs::write(dir.join("privkey.pem"), &certificate.key).unwrap();
}

/// Write a mapping file with one route per `(domain, upstream)`.
pub fn write_mapping(path: &Path, routes: &[(&str, &str)], extra: &str) {
    let mut content = String::from(extra);
    for (domain, upstream) in routes {
        content.push_str(&format!(
            "\n[[routes]]\ndomain = \"{domain}\"\nupstream = \"{upstream}\"\ntls_verify = false\n"
        ));
    }
    std::fs::write(path, content).unwrap();
}

/// Paths of one test deployment inside a temp dir.
pub struct Deployment {
    pub dir: TempDir,
    pub store: PathBuf,
    pub mapping: PathBuf,
    pub out: PathBuf,
}

impl Deployment {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("acme.json");
        let mapping = dir.path().join("mapping.toml");
        let out = dir.path().join("dynamic").join("reconciler.toml");
        Self {
            dir,
            store,
            mapping,
            out,
        }
    }

    pub fn config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            cert_store: self.store.clone(),
            mapping_path: self.mapping.clone(),
            out: self.out.clone(),
            watch_mapping: true,
            watch: WatchConfig {
                debounce_ms: 50,
                ..WatchConfig::default()
            },
            retries: RetryConfig {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
            ..ReconcilerConfig::default()
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        startup::build_reconciler(&self.config()).unwrap()
    }

    pub fn descriptor(&self) -> String {
        std::fs::read_to_string(&self.out).unwrap()
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
