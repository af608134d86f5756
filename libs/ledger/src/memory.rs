//! In-memory ledger.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::{LedgerError, LedgerStats, NewSyncAttempt, SyncAttempt, SyncLedger};

/// Ledger held in process memory. Same ordering rules as [`crate::SqliteLedger`].
#[derive(Debug, Default)]
pub struct MemoryLedger {
    rows: Mutex<Vec<SyncAttempt>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows written so far.
    pub fn len(&self) -> usize {
        self.rows().map(|rows| rows.len()).unwrap_or(0)
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rows(&self) -> Result<MutexGuard<'_, Vec<SyncAttempt>>, LedgerError> {
        self.rows.lock().map_err(|_| LedgerError::Poisoned)
    }

    fn newest_first(rows: &[SyncAttempt]) -> Vec<SyncAttempt> {
        let mut sorted = rows.to_vec();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        sorted
    }
}

impl SyncLedger for MemoryLedger {
    fn append(&self, attempt: NewSyncAttempt) -> Result<SyncAttempt, LedgerError> {
        let mut rows = self.rows()?;
        let id = rows.last().map(|r| r.id + 1).unwrap_or(1);
        let row = SyncAttempt::from_new(id, attempt);
        rows.push(row.clone());
        Ok(row)
    }

    fn recent(&self, limit: usize) -> Result<Vec<SyncAttempt>, LedgerError> {
        let rows = self.rows()?;
        let mut sorted = Self::newest_first(&rows);
        sorted.truncate(limit);
        Ok(sorted)
    }

    fn latest(&self, image: &str) -> Result<Option<SyncAttempt>, LedgerError> {
        let rows = self.rows()?;
        Ok(rows
            .iter()
            .filter(|r| r.image == image)
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)))
            .cloned())
    }

    fn aggregate(&self) -> Result<LedgerStats, LedgerError> {
        let rows = self.rows()?;
        let unique: HashSet<&str> = rows.iter().map(|r| r.image.as_str()).collect();

        Ok(LedgerStats {
            total_bytes: rows.iter().map(|r| r.bytes).fold(0, u64::saturating_add),
            total_duration_secs: rows.iter().map(|r| r.duration_secs).sum(),
            unique_images: unique.len(),
        })
    }
}
