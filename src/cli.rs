//! Command line interface.
//!
//! `run` keeps the descriptor current until shutdown, `check` renders it to
//! stdout and `inspect` lists the certificates in a store.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;

use crate::config::{
    LogFormat, ObservabilityConfig, ReconcilerConfig, ReloadConfig, StoreConfig, StoreFormat,
    WatchConfig,
};
use crate::lifecycle::startup::{self, Runtime, StartupError};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::reconcile::{CycleError, LoopError, ReconcileLoop};
use crate::store::{open_store, StoreError};

#[derive(Parser, Debug)]
#[command(name = "proxy-reconciler", version)]
#[command(
    about = "Keeps reverse proxy routes in step with the certificates on disk",
    long_about = None
)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch the certificate store and mapping, keep the descriptor current
    Run(RunArgs),
    /// Render the descriptor to stdout without writing it
    Check(CheckArgs),
    /// List the certificates found in the store
    Inspect(StoreArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormatArg {
    Auto,
    AcmeJson,
    Directory,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// acme.json file or certificate directory
    #[arg(long, value_name = "PATH")]
    pub cert_store: PathBuf,

    #[arg(long, value_enum, default_value_t = StoreFormatArg::Auto)]
    pub store_format: StoreFormatArg,

    /// Only use certificates from this ACME resolver (acme.json)
    #[arg(long)]
    pub resolver: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Domain to upstream mapping file
    #[arg(long, value_name = "PATH")]
    pub mapping: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Domain to upstream mapping file
    #[arg(long, value_name = "PATH")]
    pub mapping: PathBuf,

    /// Descriptor file the proxy loads
    #[arg(long, value_name = "PATH")]
    pub out: PathBuf,

    /// Shell command run after each new descriptor
    #[arg(long, env = "RECONCILER_RELOAD_CMD")]
    pub reload_cmd: Option<String>,

    /// URL POSTed to after each new descriptor
    #[arg(long, env = "RECONCILER_RELOAD_URL")]
    pub reload_url: Option<String>,

    /// Export certificate files here and reference them from the descriptor
    #[arg(long, value_name = "DIR")]
    pub export_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 500)]
    pub debounce_ms: u64,

    /// Attempts to re-establish a lost watch
    #[arg(long, default_value_t = 5)]
    pub watch_retries: u32,

    /// Do not watch the mapping file (SIGHUP still reloads it)
    #[arg(long)]
    pub no_watch_mapping: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_address: Option<SocketAddr>,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Loop(#[from] LoopError),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl From<StoreFormatArg> for StoreFormat {
    fn from(arg: StoreFormatArg) -> Self {
        match arg {
            StoreFormatArg::Auto => StoreFormat::Auto,
            StoreFormatArg::AcmeJson => StoreFormat::AcmeJson,
            StoreFormatArg::Directory => StoreFormat::Directory,
        }
    }
}

impl Cli {
    pub fn observability(&self) -> ObservabilityConfig {
        let metrics_address = match &self.command {
            Command::Run(args) => args.metrics_address.map(|a| a.to_string()),
            _ => None,
        };
        ObservabilityConfig {
            log_level: self.log_level.clone(),
            log_format: self.log_format.into(),
            metrics_address,
        }
    }
}

impl StoreArgs {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            format: self.store_format.into(),
            resolver: self.resolver.clone(),
        }
    }
}

impl RunArgs {
    pub fn to_config(&self, observability: ObservabilityConfig) -> ReconcilerConfig {
        ReconcilerConfig {
            cert_store: self.store.cert_store.clone(),
            mapping_path: self.mapping.clone(),
            out: self.out.clone(),
            reload: ReloadConfig {
                command: self.reload_cmd.clone(),
                url: self.reload_url.clone(),
                ..ReloadConfig::default()
            },
            watch_mapping: !self.no_watch_mapping,
            export_dir: self.export_dir.clone(),
            store: self.store.store_config(),
            watch: WatchConfig {
                debounce_ms: self.debounce_ms,
                max_retries: self.watch_retries,
                ..WatchConfig::default()
            },
            retries: Default::default(),
            observability,
        }
    }
}

/// Dispatch a parsed command line.
pub async fn execute(cli: Cli) -> Result<(), CliError> {
    let observability = cli.observability();
    match cli.command {
        Command::Run(args) => run(args.to_config(observability), args.metrics_address).await,
        Command::Check(args) => check(&args).await,
        Command::Inspect(args) => inspect(&args),
    }
}

async fn run(
    config: ReconcilerConfig,
    metrics_address: Option<SocketAddr>,
) -> Result<(), CliError> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "proxy-reconciler starting");

    if let Some(addr) = metrics_address {
        metrics::init_metrics(addr)?;
    }

    let Runtime {
        reconciler,
        watchers,
        queue_tx,
        queue_rx,
    } = startup::start(&config)?;

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    signals::spawn_termination_handler(shutdown.clone());
    let _hangup = signals::spawn_reload_handler(config.mapping_path.clone(), queue_tx.clone());

    let finished = ReconcileLoop::new(reconciler).run(queue_rx, shutdown_rx).await;

    for watcher in &watchers {
        watcher.stop();
    }
    let reconciler = finished?;
    tracing::info!(
        phase = %reconciler.phase(),
        last_digest = reconciler.state().last_digest().unwrap_or("-"),
        "Shutdown complete"
    );
    Ok(())
}

async fn check(args: &CheckArgs) -> Result<(), CliError> {
    let config = ReconcilerConfig {
        cert_store: args.store.cert_store.clone(),
        mapping_path: args.mapping.clone(),
        store: args.store.store_config(),
        ..ReconcilerConfig::default()
    };
    let mut reconciler = startup::build_reconciler(&config)?;
    let (bundle, descriptor) = reconciler.render().await?;

    std::io::stdout().write_all(descriptor.bytes())?;
    tracing::info!(
        services = descriptor.services().len(),
        certificates = bundle.certificates().len(),
        expires_at = %bundle.expires_at(),
        digest = %descriptor.digest(),
        "Descriptor rendered"
    );
    Ok(())
}

fn inspect(args: &StoreArgs) -> Result<(), CliError> {
    if !args.cert_store.exists() {
        return Err(StartupError::MissingStore {
            path: args.cert_store.clone(),
        }
        .into());
    }
    let snapshot = open_store(&args.cert_store, &args.store_config()).load()?;
    let now = Utc::now();

    let mut out = std::io::stdout().lock();
    writeln!(
        out,
        "{:<16}  {:<20}  {:<20}  {:<7}  DOMAINS",
        "FINGERPRINT", "ISSUED", "EXPIRES", "STATUS"
    )?;
    for cert in &snapshot.certificates {
        let status = if cert.is_valid_at(now) {
            "valid"
        } else if cert.is_expired_at(now) {
            "expired"
        } else {
            "pending"
        };
        writeln!(
            out,
            "{:<16}  {:<20}  {:<20}  {:<7}  {}",
            &cert.fingerprint[..cert.fingerprint.len().min(16)],
            cert.issued_at.format("%Y-%m-%d %H:%M:%S"),
            cert.expires_at.format("%Y-%m-%d %H:%M:%S"),
            status,
            cert.domains.join(", "),
        )?;
    }
    Ok(())
}
