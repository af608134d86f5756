//! SQLite-backed ledger.
//!
//! One row per attempt in the `syncs` table. Cross-process writers rely on
//! SQLite's own file locking; `busy_timeout` makes a second invocation wait
//! for the lock instead of failing immediately.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::{LedgerError, LedgerStats, NewSyncAttempt, SyncAttempt, SyncLedger, SyncStatus};

/// How long a writer waits on a locked database file.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COLUMNS: &str = "SELECT id, image, status, bytes, duration, timestamp FROM syncs";

/// Ledger persisted in a SQLite database.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open or create a ledger at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open or create a ledger with an explicit busy timeout.
    pub fn open_with_timeout<P: AsRef<Path>>(
        path: P,
        busy_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_schema()?;

        Ok(ledger)
    }

    /// Open an in-memory ledger (for testing).
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn init_schema(&self) -> Result<(), LedgerError> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS syncs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                image TEXT NOT NULL,
                status TEXT NOT NULL,
                bytes INTEGER NOT NULL DEFAULT 0,
                duration REAL NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_syncs_image ON syncs(image);
            CREATE INDEX IF NOT EXISTS idx_syncs_timestamp ON syncs(timestamp);
            "#,
        )?;

        debug!("Ledger schema initialized");
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }
}

impl SyncLedger for SqliteLedger {
    fn append(&self, attempt: NewSyncAttempt) -> Result<SyncAttempt, LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO syncs (image, status, bytes, duration, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                attempt.image,
                attempt.status.to_string(),
                i64::try_from(attempt.bytes).unwrap_or(i64::MAX),
                attempt.duration_secs,
                encode_timestamp(&attempt.timestamp),
            ],
        )?;
        let id = conn.last_insert_rowid();

        debug!(id, image = %attempt.image, status = %attempt.status, "Recorded sync attempt");
        Ok(SyncAttempt::from_new(id, attempt))
    }

    fn recent(&self, limit: usize) -> Result<Vec<SyncAttempt>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY timestamp DESC, id DESC LIMIT ?1"
        ))?;

        let rows = stmt
            .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], RawRow::read)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawRow::decode).collect()
    }

    fn latest(&self, image: &str) -> Result<Option<SyncAttempt>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE image = ?1 ORDER BY timestamp DESC, id DESC LIMIT 1"
        ))?;

        stmt.query_row(params![image], RawRow::read)
            .optional()?
            .map(RawRow::decode)
            .transpose()
    }

    fn aggregate(&self) -> Result<LedgerStats, LedgerError> {
        let conn = self.conn()?;
        // TOTAL() is a float sum and cannot raise an integer overflow.
        let (total_bytes, total_duration_secs, unique_images): (f64, f64, i64) = conn.query_row(
            "SELECT TOTAL(bytes), TOTAL(duration), COUNT(DISTINCT image) FROM syncs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(LedgerStats {
            // Float to int casts saturate.
            total_bytes: total_bytes as u64,
            total_duration_secs,
            unique_images: usize::try_from(unique_images).unwrap_or(0),
        })
    }
}

/// Row as stored, before validation.
struct RawRow {
    id: i64,
    image: String,
    status: String,
    bytes: i64,
    duration: f64,
    timestamp: String,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            image: row.get(1)?,
            status: row.get(2)?,
            bytes: row.get(3)?,
            duration: row.get(4)?,
            timestamp: row.get(5)?,
        })
    }

    fn decode(self) -> Result<SyncAttempt, LedgerError> {
        let corrupt = |reason: String| LedgerError::Corrupt {
            id: self.id,
            reason,
        };

        let status = SyncStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status {:?}", self.status)))?;
        let bytes = u64::try_from(self.bytes)
            .map_err(|_| corrupt(format!("negative byte count {}", self.bytes)))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| corrupt(format!("bad timestamp {:?}: {e}", self.timestamp)))?
            .with_timezone(&Utc);

        Ok(SyncAttempt {
            id: self.id,
            image: self.image,
            status,
            bytes,
            duration_secs: self.duration,
            timestamp,
        })
    }
}

/// Fixed-width RFC 3339 so lexical order in SQL matches time order.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
