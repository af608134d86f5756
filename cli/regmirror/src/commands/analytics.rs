//! Analytics command - bandwidth and time saved.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use regmirror_mirror::{Analyzer, BASELINE_MIB_PER_SEC};

use crate::output::{format_mib, format_secs, print_json, OutputFormat};

use super::CommandContext;

/// Analytics command.
#[derive(Debug, Args)]
pub struct AnalyticsCommand {}

impl AnalyticsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let report = Analyzer::new(ctx.open_ledger()?).report()?;

        match ctx.format {
            OutputFormat::Json => print_json(&report),
            OutputFormat::Table => {
                println!("{}", "Mirror analytics".bold());
                println!("  Images mirrored:  {}", report.total_images);
                println!(
                    "  Bandwidth used:   {}",
                    format_mib(report.total_bandwidth_bytes)
                );
                println!(
                    "  Time saved:       {} (vs {BASELINE_MIB_PER_SEC} MiB/s)",
                    format_secs(report.time_saved_secs)
                );
                println!(
                    "  Average speed:    {:.2} MiB/s",
                    report.avg_speed_mib_per_sec
                );
            }
        }

        Ok(())
    }
}
