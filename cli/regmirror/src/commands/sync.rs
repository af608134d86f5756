//! Sync command - mirror one image.

use anyhow::Result;
use clap::Args;
use regmirror_mirror::{CacheCapacityManager, SyncOutcome};
use serde::Serialize;

use crate::output::{
    format_duration, format_mib, print_info, print_json, print_success, print_warning,
    OutputFormat,
};

use super::{cancel_on_ctrl_c, CommandContext};

/// Sync command.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Image to sync (e.g. `nginx:1.25`).
    image: String,

    /// Copy every layer even if the target already has it.
    #[arg(long)]
    force: bool,

    /// Concurrent layer transfers.
    #[arg(long, short)]
    parallel: Option<usize>,
}

/// JSON form of a finished sync.
#[derive(Debug, Serialize)]
struct SyncSummary {
    image: String,
    layers: usize,
    layers_skipped: usize,
    bytes: u64,
    duration_secs: f64,
    ledger_id: i64,
    evict_suggestion: Vec<String>,
}

impl SyncCommand {
    pub async fn run(self, mut ctx: CommandContext) -> Result<()> {
        if let Some(parallel) = self.parallel {
            ctx.config.parallelism = parallel;
        }

        let ledger = ctx.open_ledger()?;
        let syncer = ctx.syncer(ledger.clone())?;

        if ctx.format == OutputFormat::Table {
            print_info(&format!(
                "Syncing {} from {} to {}",
                self.image, ctx.config.source_registry, ctx.config.target_registry
            ));
        }

        let outcome = syncer
            .sync(&self.image, self.force, cancel_on_ctrl_c())
            .await?;

        // Advisory only: a full cache never fails a sync.
        let budget = ctx.config.cache_budget()?;
        let suggestion = CacheCapacityManager::new(ledger, budget)
            .with_scan_limit(ctx.config.scan_limit)
            .suggest()?;
        let evict: Vec<String> = suggestion.images().into_iter().map(String::from).collect();

        match ctx.format {
            OutputFormat::Json => print_json(&summary(&outcome, evict)),
            OutputFormat::Table => {
                print_success(&format!(
                    "Synced {} ({} layers, {} skipped, {} in {})",
                    outcome.image,
                    outcome.stats.layers_synced,
                    outcome.stats.layers_skipped,
                    format_mib(outcome.stats.bytes_synced),
                    format_duration(outcome.stats.elapsed),
                ));
                if !evict.is_empty() {
                    print_warning(&format!(
                        "Cache is {} over budget; consider evicting: {}",
                        format_mib(suggestion.deficit),
                        evict.join(", ")
                    ));
                }
            }
        }

        Ok(())
    }
}

fn summary(outcome: &SyncOutcome, evict_suggestion: Vec<String>) -> SyncSummary {
    SyncSummary {
        image: outcome.image.clone(),
        layers: outcome.stats.layers_synced,
        layers_skipped: outcome.stats.layers_skipped,
        bytes: outcome.stats.bytes_synced,
        duration_secs: outcome.attempt.duration_secs,
        ledger_id: outcome.attempt.id,
        evict_suggestion,
    }
}
