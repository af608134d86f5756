//! # regmirror-ledger
//!
//! Append-only log of image sync attempts.
//!
//! ## Design Principles
//!
//! - Rows are immutable once written; a status change is a new row
//! - The "current" state of an image is its latest-timestamped attempt
//! - No business logic lives here, only append and query
//!
//! ## Implementations
//!
//! - [`SqliteLedger`]: durable ledger backed by a local SQLite file
//! - [`MemoryLedger`]: in-process ledger for tests and dry runs

mod error;
mod memory;
mod sqlite;
mod types;

pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use sqlite::{SqliteLedger, DEFAULT_BUSY_TIMEOUT};
pub use types::*;

/// Append/query interface over the sync outcome log.
///
/// Implementations must be safe to share between tasks. Rows are never
/// updated or deleted, so there is deliberately no mutation beyond `append`.
pub trait SyncLedger: Send + Sync {
    /// Append an attempt and return it with its assigned id.
    fn append(&self, attempt: NewSyncAttempt) -> Result<SyncAttempt, LedgerError>;

    /// Most recent attempts, newest first, at most `limit` rows.
    fn recent(&self, limit: usize) -> Result<Vec<SyncAttempt>, LedgerError>;

    /// The latest attempt for `image`, if any.
    fn latest(&self, image: &str) -> Result<Option<SyncAttempt>, LedgerError>;

    /// Totals across every row in the ledger.
    fn aggregate(&self) -> Result<LedgerStats, LedgerError>;
}
