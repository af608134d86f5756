//! Ledger record types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const COMPLETED: &str = "completed";
const FAILED: &str = "failed";

/// Outcome of a sync attempt.
///
/// Persisted as `completed` or `failed: <cause>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SyncStatus {
    /// Every layer reached the target.
    Completed,
    /// The attempt failed with the given cause.
    Failed(String),
}

impl SyncStatus {
    /// Build a failed status from any displayable cause.
    pub fn failed(cause: impl fmt::Display) -> Self {
        Self::Failed(cause.to_string())
    }

    /// Whether this is the completed status.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Parse the persisted text form.
    pub fn parse(s: &str) -> Option<Self> {
        if s == COMPLETED {
            return Some(Self::Completed);
        }
        let rest = s.strip_prefix(FAILED)?;
        let cause = rest.strip_prefix(':').unwrap_or(rest).trim();
        Some(Self::Failed(cause.to_string()))
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str(COMPLETED),
            Self::Failed(cause) => write!(f, "{FAILED}: {cause}"),
        }
    }
}

impl From<SyncStatus> for String {
    fn from(status: SyncStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for SyncStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown sync status: {value}"))
    }
}

/// An attempt that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSyncAttempt {
    /// Image key (`name:tag`).
    pub image: String,
    /// Outcome.
    pub status: SyncStatus,
    /// Bytes transferred to the target.
    pub bytes: u64,
    /// Wall time in seconds.
    pub duration_secs: f64,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
}

impl NewSyncAttempt {
    /// A completed attempt stamped now.
    pub fn completed(image: impl Into<String>, bytes: u64, duration: Duration) -> Self {
        Self {
            image: image.into(),
            status: SyncStatus::Completed,
            bytes,
            duration_secs: duration.as_secs_f64(),
            timestamp: Utc::now(),
        }
    }

    /// A failed attempt stamped now. `bytes` is whatever did reach the target.
    pub fn failed(
        image: impl Into<String>,
        cause: impl fmt::Display,
        bytes: u64,
        duration: Duration,
    ) -> Self {
        Self {
            image: image.into(),
            status: SyncStatus::failed(cause),
            bytes,
            duration_secs: duration.as_secs_f64(),
            timestamp: Utc::now(),
        }
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A persisted sync attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAttempt {
    /// Monotonic row id (insertion order).
    pub id: i64,
    /// Image key (`name:tag`).
    pub image: String,
    /// Outcome.
    pub status: SyncStatus,
    /// Bytes transferred to the target.
    pub bytes: u64,
    /// Wall time in seconds.
    pub duration_secs: f64,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
}

impl SyncAttempt {
    pub(crate) fn from_new(id: i64, attempt: NewSyncAttempt) -> Self {
        Self {
            id,
            image: attempt.image,
            status: attempt.status,
            bytes: attempt.bytes,
            duration_secs: attempt.duration_secs,
            timestamp: attempt.timestamp,
        }
    }
}

/// Totals across the whole ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Sum of bytes over all rows.
    pub total_bytes: u64,
    /// Sum of durations over all rows, in seconds.
    pub total_duration_secs: f64,
    /// Number of distinct images.
    pub unique_images: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("completed", SyncStatus::Completed)]
    #[case("failed: manifest not found", SyncStatus::Failed("manifest not found".into()))]
    #[case("failed:timeout", SyncStatus::Failed("timeout".into()))]
    #[case("failed", SyncStatus::Failed(String::new()))]
    fn test_parse_status(#[case] text: &str, #[case] expected: SyncStatus) {
        assert_eq!(SyncStatus::parse(text), Some(expected));
    }

    #[test]
    fn test_parse_unknown_status() {
        assert_eq!(SyncStatus::parse("pending"), None);
    }

    #[test]
    fn test_status_display_round_trips() {
        let status = SyncStatus::failed("push layer sha256:ab: status 500");
        assert_eq!(status.to_string(), "failed: push layer sha256:ab: status 500");
        assert_eq!(SyncStatus::parse(&status.to_string()), Some(status));
    }

    #[test]
    fn test_new_attempt_constructors() {
        let ok = NewSyncAttempt::completed("nginx:latest", 42, Duration::from_millis(1500));
        assert!(ok.status.is_completed());
        assert_eq!(ok.duration_secs, 1.5);

        let failed = NewSyncAttempt::failed("nginx:latest", "boom", 7, Duration::ZERO);
        assert_eq!(failed.status, SyncStatus::Failed("boom".into()));
        assert_eq!(failed.bytes, 7);
    }
}
