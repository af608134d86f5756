//! Auto command - prefetch predicted images.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use regmirror_mirror::{PrefetchCandidate, PrefetchPredictor};
use serde::Serialize;
use tabled::Tabled;

use crate::error::CliError;
use crate::output::{format_mib, print_info, print_output, print_success, OutputFormat};

use super::{cancel_on_ctrl_c, CommandContext};

/// Auto command.
#[derive(Debug, Args)]
pub struct AutoCommand {
    /// Number of images to prefetch.
    #[arg(long, default_value = "5")]
    top: usize,

    /// Only show what would be synced.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct CandidateRow {
    #[tabled(rename = "Rank")]
    rank: usize,

    #[tabled(rename = "Image")]
    image: String,
}

impl From<&PrefetchCandidate> for CandidateRow {
    fn from(candidate: &PrefetchCandidate) -> Self {
        Self {
            rank: candidate.rank,
            image: candidate.image.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct ResultRow {
    #[tabled(rename = "Image")]
    image: String,

    #[tabled(rename = "Result")]
    result: String,

    #[tabled(rename = "Size")]
    size: String,
}

impl AutoCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let ledger = ctx.open_ledger()?;
        let pool = ctx.config.candidate_pool()?;
        let predictor = PrefetchPredictor::new(ledger.clone(), Arc::new(pool));
        let candidates = predictor.predict(self.top)?;

        if candidates.is_empty() {
            if ctx.format == OutputFormat::Table {
                print_success("Every candidate image is already mirrored.");
            } else {
                print_output::<CandidateRow>(&[], ctx.format);
            }
            return Ok(());
        }

        if self.dry_run {
            let rows: Vec<CandidateRow> = candidates.iter().map(CandidateRow::from).collect();
            print_output(&rows, ctx.format);
            return Ok(());
        }

        if ctx.format == OutputFormat::Table {
            print_info(&format!("Prefetching {} image(s)", candidates.len()));
        }

        let syncer = ctx.syncer(ledger)?;
        let images: Vec<String> = candidates.iter().map(|c| c.image.to_string()).collect();
        let results = syncer.sync_many(&images, false, cancel_on_ctrl_c()).await;

        let total = results.len();
        let mut failed = 0;
        let rows: Vec<ResultRow> = results
            .into_iter()
            .map(|(image, result)| match result {
                Ok(outcome) => ResultRow {
                    image,
                    result: "completed".to_string(),
                    size: format_mib(outcome.stats.bytes_synced),
                },
                Err(err) => {
                    failed += 1;
                    ResultRow {
                        image,
                        result: format!("failed: {err}"),
                        size: "-".to_string(),
                    }
                }
            })
            .collect();

        print_output(&rows, ctx.format);

        if failed > 0 {
            return Err(CliError::SyncFailures { failed, total }.into());
        }
        Ok(())
    }
}
