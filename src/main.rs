use std::process::ExitCode;

use clap::Parser;

use proxy_reconciler::cli::{self, Cli};
use proxy_reconciler::observability::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(&cli.observability()) {
        eprintln!("failed to initialize logging: {e}");
    }

    match cli::execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "proxy-reconciler failed");
            ExitCode::FAILURE
        }
    }
}
