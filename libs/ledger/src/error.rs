//! Error types for ledger operations.

use thiserror::Error;

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row could not be decoded.
    #[error("corrupt ledger row {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    /// Another thread panicked while holding the ledger lock.
    #[error("ledger lock poisoned")]
    Poisoned,
}
