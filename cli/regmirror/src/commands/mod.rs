//! CLI commands.

mod analytics;
mod auto;
mod clean;
mod health;
mod status;
mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regmirror_ledger::{SqliteLedger, SyncLedger};
use regmirror_mirror::{MirrorConfig, Syncer};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::FileConfig;
use crate::output::OutputFormat;

/// regmirror - mirror container images into a local registry.
#[derive(Debug, Parser)]
#[command(name = "regmirror")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (JSON). Defaults to the platform config directory.
    #[arg(long, global = true, env = "REGISTRY_MIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Target registry address.
    #[arg(long, global = true, env = "REGISTRY_MIRROR_REGISTRY")]
    registry: Option<String>,

    /// Source registry address.
    #[arg(long, global = true, env = "REGISTRY_MIRROR_SOURCE")]
    source: Option<String>,

    /// Ledger database path.
    #[arg(long, global = true, env = "REGISTRY_MIRROR_DB")]
    db: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sync an image from the source to the target registry.
    Sync(sync::SyncCommand),

    /// Show recent sync attempts.
    Status(status::StatusCommand),

    /// Show bandwidth and time-saved figures.
    Analytics(analytics::AnalyticsCommand),

    /// Predict and sync images likely to be needed.
    Auto(auto::AutoCommand),

    /// Suggest images to evict from the cache.
    Clean(clean::CleanCommand),

    /// Check the registries and the local ledger.
    Health(health::HealthCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn log_json(&self) -> bool {
        self.log_json
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        if let Commands::Version = self.command {
            println!("regmirror {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }

        let config = self.load_config()?;
        debug!(
            source = %config.source_registry,
            target = %config.target_registry,
            ledger = %config.ledger_path.display(),
            "Configuration loaded"
        );

        let ctx = CommandContext {
            config,
            format: self.format,
        };

        match self.command {
            Commands::Sync(cmd) => cmd.run(ctx).await,
            Commands::Status(cmd) => cmd.run(ctx).await,
            Commands::Analytics(cmd) => cmd.run(ctx).await,
            Commands::Auto(cmd) => cmd.run(ctx).await,
            Commands::Clean(cmd) => cmd.run(ctx).await,
            Commands::Health(cmd) => cmd.run(ctx).await,
            Commands::Version => Ok(()),
        }
    }

    /// Defaults, then the config file, then the environment, then flags.
    fn load_config(&self) -> Result<MirrorConfig> {
        let mut config = MirrorConfig::default();
        FileConfig::load(self.config.as_deref())?.apply(&mut config);
        config
            .apply_env(|key| std::env::var(key).ok())
            .context("Invalid REGISTRY_MIRROR_* environment")?;

        if let Some(registry) = &self.registry {
            config.target_registry = registry.clone();
        }
        if let Some(source) = &self.source {
            config.source_registry = source.clone();
        }
        if let Some(db) = &self.db {
            config.ledger_path = db.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: MirrorConfig,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Open the ledger named by the configuration.
    pub fn open_ledger(&self) -> Result<Arc<dyn SyncLedger>> {
        let ledger = SqliteLedger::open(&self.config.ledger_path).with_context(|| {
            format!(
                "Failed to open ledger at {}",
                self.config.ledger_path.display()
            )
        })?;
        Ok(Arc::new(ledger))
    }

    /// A syncer for the configured registries.
    pub fn syncer(&self, ledger: Arc<dyn SyncLedger>) -> Result<Syncer> {
        Syncer::from_config(&self.config, ledger).context("Failed to set up registry clients")
    }
}

/// A cancellation flag that flips on Ctrl+C.
pub fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight transfers");
            let _ = tx.send(true);
        }
    });
    rx
}
