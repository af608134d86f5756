//! regmirror - local mirror for container registry images
//!
//! Syncs images from a remote registry into a local one, records every
//! attempt in a SQLite ledger, and gives advisory cache and prefetch advice.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level(), cli.log_json());

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
