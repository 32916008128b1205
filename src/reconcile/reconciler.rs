//! A single reconciliation cycle.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{load_mapping, MappingConfig, ReloadConfig, RetryConfig};
use crate::descriptor::{generate, RouteDescriptor};
use crate::observability::metrics;
use crate::reconcile::types::{CycleError, CycleOutcome, Phase, ReconciliationState};
use crate::resilience::{retry_with_backoff, BackoffPolicy};
use crate::store::{extract, CertificateBundle, CertificateStore};
use crate::watcher::{ChangeEvent, WatchKind};
use crate::writer::{DescriptorWriter, ReloadHook};

/// Owns everything a cycle touches. Lives on the loop task.
#[derive(Debug)]
pub struct Reconciler {
    store: Box<dyn CertificateStore>,
    mapping: MappingConfig,
    mapping_path: Option<PathBuf>,
    /// Reload settings from the command line, overlaid on the mapping's.
    reload_override: ReloadConfig,
    export_dir_override: Option<PathBuf>,
    writer: DescriptorWriter,
    store_policy: BackoffPolicy,
    state: ReconciliationState,
    phase: Phase,
}

impl Reconciler {
    pub fn new(
        store: Box<dyn CertificateStore>,
        mapping: MappingConfig,
        writer: DescriptorWriter,
    ) -> Self {
        Self {
            store,
            mapping,
            mapping_path: None,
            reload_override: ReloadConfig::default(),
            export_dir_override: None,
            writer,
            store_policy: BackoffPolicy::from(&RetryConfig::default()),
            state: ReconciliationState::default(),
            phase: Phase::Idle,
        }
    }

    /// Reload the mapping from `path` on mapping and manual events.
    pub fn with_mapping_path(
        mut self,
        path: impl Into<PathBuf>,
        reload_override: ReloadConfig,
    ) -> Self {
        self.mapping_path = Some(path.into());
        self.reload_override = reload_override;
        self
    }

    /// Export certificates to `dir` whatever the mapping file says.
    pub fn with_export_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = &dir {
            self.mapping.proxy.export_dir = Some(dir.clone());
        }
        self.export_dir_override = dir;
        self
    }

    pub fn with_store_retries(mut self, policy: BackoffPolicy) -> Self {
        self.store_policy = policy;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    pub fn mapping(&self) -> &MappingConfig {
        &self.mapping
    }

    pub fn store(&self) -> &dyn CertificateStore {
        self.store.as_ref()
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!(from = %self.phase, to = %phase, "Phase transition");
            self.phase = phase;
        }
        metrics::record_phase(phase.code());
    }

    /// Run one full cycle for `event`.
    ///
    /// Failures leave the live descriptor untouched and move the loop to
    /// `Degraded`; any success returns it to `Idle`.
    pub async fn run_cycle(&mut self, event: &ChangeEvent) -> Result<CycleOutcome, CycleError> {
        let span = tracing::info_span!(
            "cycle",
            cycle_id = %Uuid::new_v4(),
            trigger = event.kind.as_str(),
        );
        let started = Instant::now();
        let result = self.cycle(event).instrument(span.clone()).await;

        span.in_scope(|| match &result {
            Ok(outcome) => {
                self.set_phase(Phase::Idle);
                metrics::record_cycle(outcome.as_str(), started.elapsed());
            }
            Err(e) => {
                self.set_phase(Phase::Degraded);
                metrics::record_cycle("failed", started.elapsed());
                tracing::error!(
                    stage = e.stage().as_str(),
                    domain = e.domain().unwrap_or("-"),
                    class = ?e.class(),
                    cause = %e,
                    "Reconciliation failed; keeping last known good descriptor"
                );
            }
        });
        result
    }

    async fn cycle(&mut self, event: &ChangeEvent) -> Result<CycleOutcome, CycleError> {
        tracing::info!(path = %event.path.display(), modified = %event.modified, "Cycle started");

        if matches!(event.kind, WatchKind::Mapping | WatchKind::Manual) {
            self.reload_mapping()?;
        }

        let (bundle, descriptor) = self.render().await?;

        if self.state.is_current(descriptor.digest()) {
            tracing::info!(digest = %descriptor.digest(), "Descriptor unchanged; nothing to write");
            return Ok(CycleOutcome::Unchanged {
                digest: descriptor.digest().to_string(),
            });
        }

        self.set_phase(Phase::Writing);
        let applied = self.writer.apply(&descriptor, &bundle).await?;

        // A failed reload leaves the state stale so the next event retries it.
        if applied.reload_error.is_none() {
            self.state.record(applied.digest.clone(), Utc::now());
        }

        tracing::info!(
            digest = %applied.digest,
            reloaded = applied.reloaded,
            exported = applied.exported,
            "Descriptor applied"
        );
        Ok(CycleOutcome::Applied(applied))
    }

    /// Read the store, pick certificates and build the descriptor without
    /// writing anything.
    pub async fn render(&mut self) -> Result<(CertificateBundle, RouteDescriptor), CycleError> {
        self.set_phase(Phase::Extracting);
        let store = self.store.as_ref();
        let snapshot = retry_with_backoff(&self.store_policy, "load_certificate_store", move |_| {
            async move { store.load() }
        })
        .await
        .map_err(CycleError::Store)?;
        tracing::debug!(certificates = snapshot.len(), "Certificate store loaded");

        let bundle =
            extract(snapshot, &self.mapping.domains(), Utc::now()).map_err(CycleError::Extract)?;

        self.set_phase(Phase::Generating);
        let descriptor = generate(&bundle, &self.mapping)?;
        for certificate in descriptor.certificates() {
            for domain in &certificate.domains {
                metrics::record_certificate_expiry(domain, certificate.expires_at);
            }
        }

        Ok((bundle, descriptor))
    }

    /// Re-read the mapping file. On failure the previous mapping stays.
    pub fn reload_mapping(&mut self) -> Result<(), CycleError> {
        let Some(path) = &self.mapping_path else {
            return Ok(());
        };

        let mut mapping = load_mapping(path).map_err(CycleError::Mapping)?;
        if let Some(dir) = &self.export_dir_override {
            mapping.proxy.export_dir = Some(dir.clone());
        }
        let reload = mapping.reload.merged_with(&self.reload_override);
        let hook = ReloadHook::from_config(&reload).map_err(CycleError::ReloadHook)?;

        if mapping != self.mapping {
            tracing::info!(
                path = %path.display(),
                routes = mapping.routes.len(),
                "Mapping reloaded"
            );
        }
        self.writer
            .set_reload(hook, Duration::from_secs(reload.timeout_secs));
        self.mapping = mapping;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteMapping;
    use crate::store::{PrivateKeyPem, StoreError, StoreResult, StoreSnapshot, StoredCertificate};
    use chrono::{DateTime, Duration as ChronoDuration};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    /// In-memory store whose content tests can swap.
    #[derive(Debug, Clone, Default)]
    struct MemoryStore {
        certificates: Arc<Mutex<Vec<StoredCertificate>>>,
    }

    impl MemoryStore {
        fn set(&self, certificates: Vec<StoredCertificate>) {
            *self.certificates.lock().unwrap() = certificates;
        }
    }

    impl CertificateStore for MemoryStore {
        fn path(&self) -> &Path {
            Path::new("memory")
        }

        fn load(&self) -> StoreResult<StoreSnapshot> {
            Ok(StoreSnapshot::new(self.certificates.lock().unwrap().clone()))
        }
    }

    #[derive(Debug)]
    struct BrokenStore;

    impl CertificateStore for BrokenStore {
        fn path(&self) -> &Path {
            Path::new("broken")
        }

        fn load(&self) -> StoreResult<StoreSnapshot> {
            Err(StoreError::Parse {
                path: PathBuf::from("broken"),
                reason: "truncated".into(),
            })
        }
    }

    fn certificate(
        fingerprint: &str,
        domains: &[&str],
        expires_at: DateTime<Utc>,
    ) -> StoredCertificate {
        StoredCertificate {
            entry: fingerprint.into(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
            chain_pem: b"chain".to_vec(),
            key: PrivateKeyPem::new(b"key".to_vec()),
            fingerprint: fingerprint.into(),
            issued_at: Utc::now() - ChronoDuration::days(10),
            expires_at,
        }
    }

    fn mapping(domains: &[&str]) -> MappingConfig {
        MappingConfig {
            routes: domains
                .iter()
                .map(|d| RouteMapping {
                    domain: d.to_string(),
                    upstream: "https://rmm.x.com:8443/".into(),
                    tls_verify: true,
                })
                .collect(),
            ..MappingConfig::default()
        }
    }

    fn reconciler(
        store: Box<dyn CertificateStore>,
        mapping: MappingConfig,
        out: &Path,
    ) -> Reconciler {
        let policy = BackoffPolicy::new(1, 1, 1);
        let writer = DescriptorWriter::new(out, ReloadHook::None, Duration::from_secs(1), policy);
        Reconciler::new(store, mapping, writer).with_store_retries(policy)
    }

    fn event() -> ChangeEvent {
        ChangeEvent::observe(WatchKind::CertificateStore, Path::new("memory"))
    }

    #[tokio::test]
    async fn test_applies_then_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dynamic.toml");
        let store = MemoryStore::default();
        store.set(vec![certificate(
            "aa",
            &["rmm.x.com", "api.x.com"],
            Utc::now() + ChronoDuration::days(60),
        )]);
        let mut reconciler =
            reconciler(Box::new(store), mapping(&["rmm.x.com", "api.x.com"]), &out);

        let first = reconciler.run_cycle(&event()).await.unwrap();
        assert!(matches!(first, CycleOutcome::Applied(_)));
        assert_eq!(reconciler.phase(), Phase::Idle);
        assert!(out.exists());

        // Nothing changed: the cycle must not touch the filesystem.
        std::fs::remove_file(&out).unwrap();
        let second = reconciler.run_cycle(&event()).await.unwrap();
        assert!(matches!(second, CycleOutcome::Unchanged { .. }));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_renewal_rewrites_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dynamic.toml");
        let store = MemoryStore::default();
        store.set(vec![certificate("aa", &["rmm.x.com"], Utc::now() + ChronoDuration::days(5))]);
        let mut reconciler = reconciler(Box::new(store.clone()), mapping(&["rmm.x.com"]), &out);

        reconciler.run_cycle(&event()).await.unwrap();
        let before = std::fs::read(&out).unwrap();

        store.set(vec![certificate("bb", &["rmm.x.com"], Utc::now() + ChronoDuration::days(90))]);
        let outcome = reconciler.run_cycle(&event()).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Applied(_)));
        assert_ne!(std::fs::read(&out).unwrap(), before);
    }

    #[tokio::test]
    async fn test_failure_degrades_then_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dynamic.toml");
        let store = MemoryStore::default();
        store.set(vec![certificate("aa", &["rmm.x.com"], Utc::now() + ChronoDuration::days(60))]);
        let mut reconciler =
            reconciler(Box::new(store.clone()), mapping(&["rmm.x.com", "db.x.com"]), &out);

        let err = reconciler.run_cycle(&event()).await.unwrap_err();
        assert_eq!(err.domain(), Some("db.x.com"));
        assert_eq!(reconciler.phase(), Phase::Degraded);
        assert!(!out.exists());

        store.set(vec![certificate(
            "bb",
            &["rmm.x.com", "db.x.com"],
            Utc::now() + ChronoDuration::days(60),
        )]);
        reconciler.run_cycle(&event()).await.unwrap();
        assert_eq!(reconciler.phase(), Phase::Idle);
        assert!(out.exists());
    }

    #[tokio::test]
    async fn test_store_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dynamic.toml");
        let mut reconciler = reconciler(Box::new(BrokenStore), mapping(&["rmm.x.com"]), &out);

        let err = reconciler.run_cycle(&event()).await.unwrap_err();
        assert!(matches!(err, CycleError::Store(_)));
        assert_eq!(reconciler.phase(), Phase::Degraded);
    }

    #[tokio::test]
    async fn test_mapping_event_reloads_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dynamic.toml");
        let mapping_path = dir.path().join("mapping.toml");
        std::fs::write(
            &mapping_path,
            "[[routes]]\ndomain = \"api.x.com\"\nupstream = \"http://10.0.0.2:8080/\"\n",
        )
        .unwrap();

        let store = MemoryStore::default();
        store.set(vec![certificate(
            "aa",
            &["rmm.x.com", "api.x.com"],
            Utc::now() + ChronoDuration::days(60),
        )]);
        let mut reconciler = reconciler(Box::new(store), mapping(&["rmm.x.com"]), &out)
            .with_mapping_path(&mapping_path, ReloadConfig::default());

        let event = ChangeEvent::observe(WatchKind::Mapping, &mapping_path);
        reconciler.run_cycle(&event).await.unwrap();
        assert_eq!(reconciler.mapping().domains(), vec!["api.x.com".to_string()]);

        // A broken mapping keeps the previous one.
        std::fs::write(&mapping_path, "routes = 42").unwrap();
        let err = reconciler.run_cycle(&event).await.unwrap_err();
        assert!(matches!(err, CycleError::Mapping(_)));
        assert_eq!(reconciler.mapping().domains(), vec!["api.x.com".to_string()]);
    }
}
