//! Status command - recent sync attempts.

use anyhow::Result;
use clap::Args;
use regmirror_ledger::SyncAttempt;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{format_mib, format_secs, print_output};

use super::CommandContext;

/// Status command.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Number of attempts to show.
    #[arg(long, short = 'n', default_value = "20")]
    limit: usize,
}

/// One ledger row as displayed.
#[derive(Debug, Serialize, Tabled)]
struct AttemptRow {
    #[tabled(rename = "ID")]
    id: i64,

    #[tabled(rename = "Image")]
    image: String,

    #[tabled(rename = "Status")]
    status: String,

    #[tabled(rename = "Size", display = "display_mib")]
    bytes: u64,

    #[tabled(rename = "Duration", display = "display_secs")]
    duration_secs: f64,

    #[tabled(rename = "Time")]
    timestamp: String,
}

fn display_mib(bytes: &u64) -> String {
    format_mib(*bytes)
}

fn display_secs(secs: &f64) -> String {
    format_secs(*secs)
}

impl From<SyncAttempt> for AttemptRow {
    fn from(attempt: SyncAttempt) -> Self {
        Self {
            id: attempt.id,
            image: attempt.image,
            status: attempt.status.to_string(),
            bytes: attempt.bytes,
            duration_secs: attempt.duration_secs,
            timestamp: attempt.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl StatusCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let ledger = ctx.open_ledger()?;
        let rows: Vec<AttemptRow> = ledger
            .recent(self.limit)?
            .into_iter()
            .map(AttemptRow::from)
            .collect();

        print_output(&rows, ctx.format);
        Ok(())
    }
}
