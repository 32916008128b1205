//! Configuration schema definitions.
//!
//! Two documents live here: the mapping file (domains → upstreams, loaded from
//! TOML and hot-reloadable) and the runtime settings assembled from the command
//! line. All types derive Serde traits and carry defaults so minimal configs work.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::normalize_domain;

/// Root of the mapping file.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct MappingConfig {
    /// Settings shared by every generated router.
    pub proxy: ProxySettings,

    /// Reload hook invoked after a descriptor is written.
    pub reload: ReloadConfig,

    /// One entry per routed domain.
    pub routes: Vec<RouteMapping>,
}

impl MappingConfig {
    /// Normalized domains in file order.
    pub fn domains(&self) -> Vec<String> {
        self.routes.iter().map(|r| normalize_domain(&r.domain)).collect()
    }

    /// Look up the route for a domain (case-insensitive).
    pub fn route_for(&self, domain: &str) -> Option<&RouteMapping> {
        let wanted = normalize_domain(domain);
        self.routes
            .iter()
            .find(|r| normalize_domain(&r.domain) == wanted)
    }
}

/// Proxy-wide settings rendered into each router/service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProxySettings {
    /// Traefik entry points the routers attach to. Empty means all.
    pub entry_points: Vec<String>,

    /// Directory certificate material is exported to. Enables `tls.certificates`.
    pub export_dir: Option<PathBuf>,

    /// Forward the client Host header upstream.
    pub pass_host_header: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            entry_points: Vec::new(),
            export_dir: None,
            pass_host_header: true,
        }
    }
}

/// A single domain → upstream mapping.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteMapping {
    /// Public domain name served by the proxy.
    pub domain: String,

    /// Upstream URL (scheme + host + port).
    pub upstream: String,

    /// Verify the upstream's TLS certificate.
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,
}

fn default_tls_verify() -> bool {
    true
}

/// Reload hook configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReloadConfig {
    /// Shell command run after a successful write.
    pub command: Option<String>,

    /// HTTP endpoint POSTed to after a successful write.
    pub url: Option<String>,

    /// Timeout for a single hook invocation in seconds.
    pub timeout_secs: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            command: None,
            url: None,
            timeout_secs: 10,
        }
    }
}

impl ReloadConfig {
    /// Overlay non-empty values from `other` on top of `self`.
    pub fn merged_with(&self, other: &ReloadConfig) -> ReloadConfig {
        ReloadConfig {
            command: other.command.clone().or_else(|| self.command.clone()),
            url: other.url.clone().or_else(|| self.url.clone()),
            timeout_secs: self.timeout_secs,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.command.is_some() || self.url.is_some()
    }
}

/// Layout of the certificate store on disk.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreFormat {
    /// Directory → one sub-directory per certificate, file → `acme.json`.
    #[default]
    Auto,
    /// Traefik-style `acme.json`.
    AcmeJson,
    /// certbot-style `live/<name>/fullchain.pem` + `privkey.pem`.
    Directory,
}

/// Certificate store settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub format: StoreFormat,

    /// Only read certificates issued by this ACME resolver (`acme.json` only).
    pub resolver: Option<String>,
}

/// File watcher settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Events closer together than this collapse into one.
    pub debounce_ms: u64,

    /// Attempts to re-establish a lost watch before giving up.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            max_retries: 5,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

/// Retry configuration for transient write and reload failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Prometheus exporter bind address. Disabled when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_address: None,
        }
    }
}

/// Runtime settings for the `run` command.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Certificate store path (file or directory).
    pub cert_store: PathBuf,

    /// Mapping file path.
    pub mapping_path: PathBuf,

    /// Live descriptor path the proxy watches.
    pub out: PathBuf,

    /// Reload hook overrides from the command line / environment.
    pub reload: ReloadConfig,

    /// Hot-reload the mapping file.
    pub watch_mapping: bool,

    /// Overrides `[proxy] export_dir` from the mapping file.
    pub export_dir: Option<PathBuf>,

    pub store: StoreConfig,
    pub watch: WatchConfig,
    pub retries: RetryConfig,
    pub observability: ObservabilityConfig,
}
