//! Mirror usage analytics.

use std::sync::Arc;

use regmirror_ledger::{LedgerError, LedgerStats, SyncLedger};
use serde::Serialize;

/// Assumed pull speed without a local mirror, in MiB/s.
pub const BASELINE_MIB_PER_SEC: f64 = 5.0;

const MIB: f64 = 1024.0 * 1024.0;

/// Summary of everything the ledger has recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Report {
    pub total_images: usize,
    pub total_bandwidth_bytes: u64,
    /// Time saved against pulling at the baseline speed. Never negative.
    pub time_saved_secs: f64,
    pub avg_speed_mib_per_sec: f64,
}

impl Report {
    pub fn from_stats(stats: &LedgerStats) -> Self {
        let mib = stats.total_bytes as f64 / MIB;
        let duration = stats.total_duration_secs;

        let avg_speed_mib_per_sec = if duration > 0.0 { mib / duration } else { 0.0 };

        Self {
            total_images: stats.unique_images,
            total_bandwidth_bytes: stats.total_bytes,
            time_saved_secs: (mib / BASELINE_MIB_PER_SEC - duration).max(0.0),
            avg_speed_mib_per_sec,
        }
    }

    pub fn total_bandwidth_mib(&self) -> f64 {
        self.total_bandwidth_bytes as f64 / MIB
    }
}

/// Builds [`Report`]s from a ledger.
pub struct Analyzer {
    ledger: Arc<dyn SyncLedger>,
}

impl Analyzer {
    pub fn new(ledger: Arc<dyn SyncLedger>) -> Self {
        Self { ledger }
    }

    pub fn report(&self) -> Result<Report, LedgerError> {
        Ok(Report::from_stats(&self.ledger.aggregate()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regmirror_ledger::{MemoryLedger, NewSyncAttempt};
    use std::time::Duration;

    #[test]
    fn test_empty_ledger() {
        let report = Analyzer::new(Arc::new(MemoryLedger::new())).report().unwrap();
        assert_eq!(report, Report::default());
    }

    #[test]
    fn test_report_figures() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .append(NewSyncAttempt::completed(
                "nginx:latest",
                100 * 1024 * 1024,
                Duration::from_secs(4),
            ))
            .unwrap();
        ledger
            .append(NewSyncAttempt::completed(
                "nginx:latest",
                0,
                Duration::from_secs(1),
            ))
            .unwrap();

        let report = Analyzer::new(ledger).report().unwrap();
        assert_eq!(report.total_images, 1);
        assert_eq!(report.total_bandwidth_bytes, 100 * 1024 * 1024);
        assert!((report.total_bandwidth_mib() - 100.0).abs() < 1e-9);
        // 100 MiB at 5 MiB/s is 20 s; the mirror took 5 s.
        assert!((report.time_saved_secs - 15.0).abs() < 1e-9);
        assert!((report.avg_speed_mib_per_sec - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_saved_is_never_negative() {
        let report = Report::from_stats(&LedgerStats {
            total_bytes: 1024 * 1024,
            total_duration_secs: 60.0,
            unique_images: 1,
        });
        assert_eq!(report.time_saved_secs, 0.0);
    }
}
