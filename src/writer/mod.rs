//! Descriptor writer subsystem.
//!
//! # Data Flow
//! ```text
//! RouteDescriptor + CertificateBundle
//!     → export.rs (fullchain.pem / privkey.pem, when export is configured)
//!     → atomic.rs (stage to temp file, fsync, rename over the live path)
//!     → reload.rs (command or HTTP hook)
//!     → AppliedResult
//! ```
//!
//! # Design Decisions
//! - Writes and reloads retry with bounded backoff
//! - A failed reload is reported on the result, not as an error: the new
//!   descriptor is already live

pub mod atomic;
pub mod export;
pub mod reload;
pub mod types;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use atomic::{AtomicFile, StagedWrite};
pub use export::export_certificates;
pub use reload::{ReloadHook, ReloadNotice};
pub use types::{AppliedResult, ApplyError, ReloadError, WriteError};

use crate::config::{ReloadConfig, RetryConfig};
use crate::descriptor::RouteDescriptor;
use crate::observability::metrics;
use crate::resilience::{retry_with_backoff, BackoffPolicy};
use crate::store::CertificateBundle;

/// Puts descriptors on disk and tells the proxy about them.
#[derive(Debug, Clone)]
pub struct DescriptorWriter {
    out: PathBuf,
    hook: ReloadHook,
    timeout: Duration,
    policy: BackoffPolicy,
    client: reqwest::Client,
}

impl DescriptorWriter {
    pub fn new(
        out: impl Into<PathBuf>,
        hook: ReloadHook,
        timeout: Duration,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            out: out.into(),
            hook,
            timeout,
            policy,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(
        out: impl Into<PathBuf>,
        reload: &ReloadConfig,
        retries: &RetryConfig,
    ) -> Result<Self, ReloadError> {
        Ok(Self::new(
            out,
            ReloadHook::from_config(reload)?,
            Duration::from_secs(reload.timeout_secs),
            BackoffPolicy::from(retries),
        ))
    }

    pub fn out(&self) -> &Path {
        &self.out
    }

    pub fn hook(&self) -> &ReloadHook {
        &self.hook
    }

    /// Swap the reload hook after a mapping reload.
    pub fn set_reload(&mut self, hook: ReloadHook, timeout: Duration) {
        self.hook = hook;
        self.timeout = timeout;
    }

    /// Export certificates, replace the live descriptor, then reload.
    pub async fn apply(
        &self,
        descriptor: &RouteDescriptor,
        bundle: &CertificateBundle,
    ) -> Result<AppliedResult, ApplyError> {
        let exported = retry_with_backoff(&self.policy, "export_certificates", move |_| async move {
            export_certificates(descriptor, bundle)
        })
        .await
        .map_err(ApplyError::Export)?;

        let out = self.out.as_path();
        let bytes = descriptor.bytes();
        retry_with_backoff(&self.policy, "write_descriptor", move |_| async move {
            AtomicFile::new(out).write(bytes)
        })
        .await
        .map_err(ApplyError::Write)?;

        tracing::info!(
            path = %self.out.display(),
            digest = %descriptor.digest(),
            services = descriptor.services().len(),
            "Descriptor written"
        );

        let (reloaded, reload_error) = self.reload(descriptor).await;

        Ok(AppliedResult {
            digest: descriptor.digest().to_string(),
            path: self.out.clone(),
            reloaded,
            reload_error,
            exported,
        })
    }

    async fn reload(&self, descriptor: &RouteDescriptor) -> (bool, Option<String>) {
        if self.hook.is_none() {
            return (false, None);
        }

        let hook = &self.hook;
        let client = &self.client;
        let timeout = self.timeout;
        match retry_with_backoff(&self.policy, "reload_proxy", move |_| {
            hook.trigger(descriptor, client, timeout)
        })
        .await
        {
            Ok(reloaded) => (reloaded, None),
            Err(e) => {
                metrics::record_reload_failure();
                tracing::warn!(error = %e, "Proxy reload failed; descriptor is live");
                (false, Some(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MappingConfig, RouteMapping};
    use crate::descriptor::generate;
    use crate::store::{extract, PrivateKeyPem, StoreSnapshot, StoredCertificate};
    use chrono::{TimeZone, Utc};

    fn fixture() -> (RouteDescriptor, CertificateBundle) {
        let mapping = MappingConfig {
            routes: vec![RouteMapping {
                domain: "rmm.x.com".into(),
                upstream: "https://rmm.x.com:8443/".into(),
                tls_verify: true,
            }],
            ..MappingConfig::default()
        };
        let cert = StoredCertificate {
            entry: "rmm".into(),
            domains: vec!["rmm.x.com".into()],
            chain_pem: b"chain".to_vec(),
            key: PrivateKeyPem::new(b"key".to_vec()),
            fingerprint: "aa".into(),
            issued_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            expires_at: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        };
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let bundle = extract(StoreSnapshot::new(vec![cert]), &mapping.domains(), now).unwrap();
        let descriptor = generate(&bundle, &mapping).unwrap();
        (descriptor, bundle)
    }

    fn writer(out: &Path, hook: ReloadHook) -> DescriptorWriter {
        DescriptorWriter::new(out, hook, Duration::from_secs(5), BackoffPolicy::new(2, 1, 5))
    }

    #[tokio::test]
    async fn test_apply_without_hook() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dynamic.toml");
        let (descriptor, bundle) = fixture();

        let result = writer(&out, ReloadHook::None)
            .apply(&descriptor, &bundle)
            .await
            .unwrap();

        assert_eq!(result.digest, descriptor.digest());
        assert!(!result.reloaded);
        assert!(result.reload_error.is_none());
        assert_eq!(result.exported, 0);
        assert_eq!(std::fs::read(&out).unwrap(), descriptor.bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_retried_until_destination_frees_up() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dynamic.toml");
        // Renaming over a directory fails until it is removed.
        std::fs::create_dir(&out).unwrap();
        let (descriptor, bundle) = fixture();

        let blocker = out.clone();
        let clear = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            std::fs::remove_dir(&blocker).unwrap();
        });

        let policy = BackoffPolicy::new(3, 50, 100);
        let writer = DescriptorWriter::new(&out, ReloadHook::None, Duration::from_secs(5), policy);
        let result = writer.apply(&descriptor, &bundle).await.unwrap();
        clear.await.unwrap();

        assert_eq!(result.digest, descriptor.digest());
        assert_eq!(std::fs::read(&out).unwrap(), descriptor.bytes());
    }

    #[tokio::test]
    async fn test_write_gives_up_after_budget() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dynamic.toml");
        std::fs::create_dir(&out).unwrap();
        let (descriptor, bundle) = fixture();

        let err = writer(&out, ReloadHook::None)
            .apply(&descriptor, &bundle)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Write(WriteError::Commit { .. })));
        assert!(out.is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reload_command() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dynamic.toml");
        let (descriptor, bundle) = fixture();

        let result = writer(&out, ReloadHook::Command("true".into()))
            .apply(&descriptor, &bundle)
            .await
            .unwrap();
        assert!(result.reloaded);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_reload_keeps_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dynamic.toml");
        let (descriptor, bundle) = fixture();

        let result = writer(&out, ReloadHook::Command("exit 1".into()))
            .apply(&descriptor, &bundle)
            .await
            .unwrap();

        assert!(!result.reloaded);
        assert!(result.reload_error.is_some());
        assert_eq!(std::fs::read(&out).unwrap(), descriptor.bytes());
    }
}
