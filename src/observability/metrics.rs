//! Metrics collection and exposition.
//!
//! # Metrics
//! - `reconciler_cycles_total` (counter): cycles by outcome
//! - `reconciler_cycle_duration_seconds` (histogram): cycle latency
//! - `reconciler_phase` (gauge): current loop phase
//! - `reconciler_certificate_expiry_timestamp_seconds` (gauge): per domain
//! - `reconciler_reload_failures_total` (counter)
//! - `reconciler_watch_events_total` (counter): debounced events by kind
//!
//! Recording is a no-op until an exporter is installed.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::watcher::WatchKind;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_watch_event(kind: WatchKind) {
    counter!("reconciler_watch_events_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_cycle(outcome: &'static str, elapsed: Duration) {
    counter!("reconciler_cycles_total", "outcome" => outcome).increment(1);
    histogram!("reconciler_cycle_duration_seconds").record(elapsed.as_secs_f64());
}

/// Phase encoded as a number (see `Phase::code`).
pub fn record_phase(code: u8) {
    gauge!("reconciler_phase").set(f64::from(code));
}

pub fn record_certificate_expiry(domain: &str, expires_at: DateTime<Utc>) {
    gauge!(
        "reconciler_certificate_expiry_timestamp_seconds",
        "domain" => domain.to_string()
    )
    .set(expires_at.timestamp() as f64);
}

pub fn record_reload_failure() {
    counter!("reconciler_reload_failures_total").increment(1);
}
