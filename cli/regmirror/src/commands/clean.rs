//! Clean command - eviction suggestion.
//!
//! Only suggests; nothing is deleted from the target registry.

use anyhow::Result;
use clap::Args;
use regmirror_mirror::{CacheBudget, CacheCapacityManager, CachePolicy, EvictionCandidate};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{format_mib, print_info, print_json, print_output, print_warning, OutputFormat};

use super::CommandContext;

/// Clean command.
#[derive(Debug, Args)]
pub struct CleanCommand {
    /// Cache budget in MiB.
    #[arg(long, env = "REGISTRY_MIRROR_CACHE_MAX_MB")]
    max_mb: Option<u64>,

    /// Eviction policy (LRU or FIFO).
    #[arg(long, env = "REGISTRY_MIRROR_CACHE_POLICY")]
    policy: Option<CachePolicy>,
}

#[derive(Debug, Serialize, Tabled)]
struct CandidateRow {
    #[tabled(rename = "Image")]
    image: String,

    #[tabled(rename = "Size")]
    size: String,
}

impl From<&EvictionCandidate> for CandidateRow {
    fn from(candidate: &EvictionCandidate) -> Self {
        Self {
            image: candidate.image.clone(),
            size: format_mib(candidate.bytes),
        }
    }
}

impl CleanCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let policy = self.policy.unwrap_or(ctx.config.cache_policy);
        let budget = match self.max_mb {
            Some(mib) => CacheBudget::from_mib(mib, policy)?,
            None => CacheBudget::new(ctx.config.cache_max_bytes, policy)?,
        };

        let manager = CacheCapacityManager::new(ctx.open_ledger()?, budget)
            .with_scan_limit(ctx.config.scan_limit);
        let suggestion = manager.suggest()?;

        if ctx.format == OutputFormat::Json {
            print_json(&suggestion);
            return Ok(());
        }

        print_info(&format!(
            "Cache usage {} of {} ({})",
            format_mib(suggestion.usage),
            format_mib(manager.budget().max_bytes()),
            manager.budget().policy()
        ));

        if suggestion.deficit == 0 {
            print_info("Cache is within budget, nothing to evict.");
            return Ok(());
        }

        let rows: Vec<CandidateRow> = suggestion.candidates.iter().map(CandidateRow::from).collect();
        print_output(&rows, ctx.format);
        print_info(&format!(
            "Evicting these would free {} (over budget by {}). No images were deleted.",
            format_mib(suggestion.bytes_freed),
            format_mib(suggestion.deficit)
        ));
        if !suggestion.is_sufficient() {
            print_warning("Sync history does not cover the whole deficit.");
        }

        Ok(())
    }
}
