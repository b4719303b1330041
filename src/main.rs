//! Main entry point for the tap-trustpilot CLI

use clap::Parser;
use tap_trustpilot::cli::Cli;
use tap_trustpilot::metrics::init_metrics;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing on stderr with optional JSON formatting
///
/// stdout carries the Singer messages, so logs never go there.
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tap_trustpilot=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = init_metrics(addr) {
            error!("Metrics unavailable: {}", e);
            std::process::exit(1);
        }
    }

    let result = cli.execute().await.map_err(|e| anyhow::anyhow!(e));

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
