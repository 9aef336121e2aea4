//! dealgood - replays gateway traffic against several targets and compares them

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Logs go to stderr so reports on stdout stay clean.
    let filter = if cli.verbose {
        EnvFilter::new(cli.log_directive())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_directive()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Remote sources build TLS configs from the process default.
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dealgood starting");

    cli::run(cli).await
}
