//! Cache capacity planning.
//!
//! Compares ledger usage against a byte budget and picks which images to
//! evict, using sync history as the recency signal. Nothing is deleted here;
//! the suggestion is advisory.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regmirror_ledger::{LedgerError, SyncAttempt, SyncLedger};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_SCAN_LIMIT;
use crate::error::ConfigurationError;

const MIB: u64 = 1024 * 1024;

/// Eviction ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CachePolicy {
    /// Least recently synced first.
    #[default]
    Lru,
    /// First synced first.
    Fifo,
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lru => f.write_str("LRU"),
            Self::Fifo => f.write_str("FIFO"),
        }
    }
}

impl FromStr for CachePolicy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LRU" => Ok(Self::Lru),
            "FIFO" => Ok(Self::Fifo),
            _ => Err(ConfigurationError::InvalidPolicy(s.to_string())),
        }
    }
}

/// Byte budget for the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheBudget {
    max_bytes: u64,
    policy: CachePolicy,
}

impl CacheBudget {
    /// A budget of `max_bytes`, which must be non-zero.
    pub fn new(max_bytes: u64, policy: CachePolicy) -> Result<Self, ConfigurationError> {
        if max_bytes == 0 {
            return Err(ConfigurationError::InvalidBudget);
        }
        Ok(Self { max_bytes, policy })
    }

    /// A budget given in MiB.
    pub fn from_mib(max_mib: u64, policy: CachePolicy) -> Result<Self, ConfigurationError> {
        Self::new(max_mib.saturating_mul(MIB), policy)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }
}

/// One image proposed for eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictionCandidate {
    pub image: String,
    /// Bytes freed by evicting it.
    pub bytes: u64,
}

/// Output of [`CacheCapacityManager::suggest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionSuggestion {
    /// Images to evict, in eviction order.
    pub candidates: Vec<EvictionCandidate>,
    /// Sum of the candidates' footprints.
    pub bytes_freed: u64,
    /// How far usage exceeds the budget (0 when within budget).
    pub deficit: u64,
    /// Usage the suggestion was computed from.
    pub usage: u64,
}

impl EvictionSuggestion {
    pub fn images(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.image.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Whether evicting every candidate brings usage within budget.
    pub fn is_sufficient(&self) -> bool {
        self.bytes_freed >= self.deficit
    }
}

/// Computes eviction suggestions from ledger history.
pub struct CacheCapacityManager {
    ledger: Arc<dyn SyncLedger>,
    budget: CacheBudget,
    scan_limit: usize,
}

impl CacheCapacityManager {
    pub fn new(ledger: Arc<dyn SyncLedger>, budget: CacheBudget) -> Self {
        Self {
            ledger,
            budget,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    /// Number of ledger records considered when planning.
    pub fn with_scan_limit(mut self, scan_limit: usize) -> Self {
        self.scan_limit = scan_limit;
        self
    }

    pub fn budget(&self) -> CacheBudget {
        self.budget
    }

    /// The shortest eviction list, under the budget's policy, that brings
    /// usage back within budget. Empty when already within budget.
    pub fn suggest(&self) -> Result<EvictionSuggestion, LedgerError> {
        let usage = self.ledger.aggregate()?.total_bytes;
        let max_bytes = self.budget.max_bytes();

        if usage <= max_bytes {
            debug!(usage, max_bytes, "Cache within budget");
            return Ok(EvictionSuggestion {
                usage,
                ..Default::default()
            });
        }

        let deficit = usage - max_bytes;
        let records = self.ledger.recent(self.scan_limit)?;
        let candidates = plan_eviction(&records, self.budget.policy(), deficit);
        let bytes_freed = candidates.iter().map(|c| c.bytes).fold(0, u64::saturating_add);

        let suggestion = EvictionSuggestion {
            candidates,
            bytes_freed,
            deficit,
            usage,
        };

        if suggestion.is_sufficient() {
            info!(
                usage,
                max_bytes,
                deficit,
                bytes_freed,
                candidates = suggestion.candidates.len(),
                policy = %self.budget.policy(),
                "Cache over budget"
            );
        } else {
            warn!(
                usage,
                max_bytes,
                deficit,
                bytes_freed,
                scanned = records.len(),
                "Not enough history to cover cache deficit"
            );
        }

        Ok(suggestion)
    }
}

/// Per-image view folded from ledger records.
struct ImageFootprint {
    bytes: u64,
    bytes_at: (DateTime<Utc>, i64),
    last_seen: (DateTime<Utc>, i64),
    first_id: i64,
}

/// Pick the prefix of images, ordered by `policy`, whose footprints first
/// reach `deficit`. Returns every image with a footprint if they cannot.
///
/// An image's footprint is the byte count of its latest record that moved
/// any bytes. Images that never did are left out.
pub fn plan_eviction(
    records: &[SyncAttempt],
    policy: CachePolicy,
    deficit: u64,
) -> Vec<EvictionCandidate> {
    if deficit == 0 {
        return Vec::new();
    }

    let mut images: HashMap<&str, ImageFootprint> = HashMap::new();
    for record in records {
        let key = (record.timestamp, record.id);
        let entry = images
            .entry(record.image.as_str())
            .or_insert(ImageFootprint {
                bytes: 0,
                bytes_at: (DateTime::<Utc>::MIN_UTC, i64::MIN),
                last_seen: key,
                first_id: record.id,
            });

        entry.last_seen = entry.last_seen.max(key);
        entry.first_id = entry.first_id.min(record.id);
        if record.bytes > 0 && key > entry.bytes_at {
            entry.bytes = record.bytes;
            entry.bytes_at = key;
        }
    }

    let mut ordered: Vec<_> = images.into_iter().filter(|(_, f)| f.bytes > 0).collect();
    match policy {
        CachePolicy::Lru => ordered.sort_by_key(|(_, f)| f.last_seen),
        CachePolicy::Fifo => ordered.sort_by_key(|(_, f)| f.first_id),
    }

    let mut freed = 0u64;
    let mut candidates = Vec::new();
    for (image, footprint) in ordered {
        if freed >= deficit {
            break;
        }
        freed = freed.saturating_add(footprint.bytes);
        candidates.push(EvictionCandidate {
            image: image.to_string(),
            bytes: footprint.bytes,
        });
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use regmirror_ledger::{MemoryLedger, NewSyncAttempt};
    use rstest::rstest;
    use std::time::Duration;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    fn record(id: i64, image: &str, bytes: u64, minute: u32) -> SyncAttempt {
        let new = NewSyncAttempt::completed(image, bytes, Duration::from_secs(1)).at(at(minute));
        SyncAttempt {
            id,
            image: new.image,
            status: new.status,
            bytes: new.bytes,
            duration_secs: new.duration_secs,
            timestamp: new.timestamp,
        }
    }

    fn ledger_with(rows: &[(&str, u64, u32)]) -> Arc<MemoryLedger> {
        let ledger = Arc::new(MemoryLedger::new());
        for (image, bytes, minute) in rows {
            ledger
                .append(NewSyncAttempt::completed(*image, *bytes, Duration::from_secs(2)).at(at(*minute)))
                .unwrap();
        }
        ledger
    }

    #[rstest]
    #[case("LRU", CachePolicy::Lru)]
    #[case("lru", CachePolicy::Lru)]
    #[case("FIFO", CachePolicy::Fifo)]
    #[case(" fifo ", CachePolicy::Fifo)]
    fn test_policy_from_str(#[case] input: &str, #[case] expected: CachePolicy) {
        assert_eq!(input.parse::<CachePolicy>().unwrap(), expected);
    }

    #[test]
    fn test_policy_rejects_unknown() {
        assert!(matches!(
            "MRU".parse::<CachePolicy>(),
            Err(ConfigurationError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(matches!(
            CacheBudget::new(0, CachePolicy::Lru),
            Err(ConfigurationError::InvalidBudget)
        ));
    }

    #[test]
    fn test_within_budget_suggests_nothing() {
        let ledger = ledger_with(&[("nginx:latest", 50 * MIB, 1)]);
        let manager =
            CacheCapacityManager::new(ledger, CacheBudget::from_mib(100, CachePolicy::Lru).unwrap());

        let suggestion = manager.suggest().unwrap();
        assert!(suggestion.is_empty());
        assert_eq!(suggestion.deficit, 0);
        assert_eq!(suggestion.usage, 50 * MIB);
    }

    #[test]
    fn test_lru_scenario_evicts_oldest() {
        let ledger = ledger_with(&[
            ("a:latest", 60 * MIB, 1),
            ("b:latest", 30 * MIB, 2),
            ("c:latest", 20 * MIB, 3),
        ]);
        let manager =
            CacheCapacityManager::new(ledger, CacheBudget::from_mib(100, CachePolicy::Lru).unwrap());

        let suggestion = manager.suggest().unwrap();
        assert_eq!(suggestion.usage, 110 * MIB);
        assert_eq!(suggestion.deficit, 10 * MIB);
        assert_eq!(suggestion.images(), vec!["a:latest"]);
        assert_eq!(suggestion.bytes_freed, 60 * MIB);
    }

    #[test]
    fn test_lru_uses_latest_sync_time() {
        // a was synced first but refreshed last, so b is now the oldest.
        let records = vec![
            record(1, "a", 10, 1),
            record(2, "b", 10, 2),
            record(3, "a", 10, 3),
        ];

        let lru = plan_eviction(&records, CachePolicy::Lru, 5);
        assert_eq!(lru[0].image, "b");

        let fifo = plan_eviction(&records, CachePolicy::Fifo, 5);
        assert_eq!(fifo[0].image, "a");
    }

    #[test]
    fn test_footprint_ignores_failed_zero_byte_rows() {
        let failed = {
            let new = NewSyncAttempt::failed("a", "timeout", 0, Duration::from_secs(1)).at(at(5));
            SyncAttempt {
                id: 2,
                image: new.image,
                status: new.status,
                bytes: new.bytes,
                duration_secs: new.duration_secs,
                timestamp: new.timestamp,
            }
        };
        let records = vec![record(1, "a", 40, 1), failed, record(3, "b", 10, 3)];

        let candidates = plan_eviction(&records, CachePolicy::Lru, 30);
        // b's last sync is older than a's failed attempt.
        assert_eq!(
            candidates,
            vec![
                EvictionCandidate {
                    image: "b".to_string(),
                    bytes: 10
                },
                EvictionCandidate {
                    image: "a".to_string(),
                    bytes: 40
                },
            ]
        );
    }

    #[test]
    fn test_images_without_bytes_are_skipped() {
        let records = vec![record(1, "empty", 0, 1), record(2, "full", 25, 2)];
        let candidates = plan_eviction(&records, CachePolicy::Fifo, 10);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].image, "full");
    }

    #[test]
    fn test_freed_bytes_saturate() {
        let records = vec![
            record(1, "a", u64::MAX - 1, 1),
            record(2, "b", u64::MAX, 2),
        ];
        let candidates = plan_eviction(&records, CachePolicy::Fifo, u64::MAX);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_insufficient_history_returns_everything() {
        let ledger = ledger_with(&[("a", 60 * MIB, 1), ("a", 60 * MIB, 2)]);
        let manager =
            CacheCapacityManager::new(ledger, CacheBudget::from_mib(10, CachePolicy::Lru).unwrap());

        let suggestion = manager.suggest().unwrap();
        assert_eq!(suggestion.deficit, 110 * MIB);
        assert_eq!(suggestion.images(), vec!["a"]);
        assert!(!suggestion.is_sufficient());
    }

    #[test]
    fn test_scan_limit_bounds_history() {
        let ledger = ledger_with(&[("old", 80 * MIB, 1), ("new", 40 * MIB, 2)]);
        let manager =
            CacheCapacityManager::new(ledger, CacheBudget::from_mib(100, CachePolicy::Lru).unwrap())
                .with_scan_limit(1);

        let suggestion = manager.suggest().unwrap();
        assert_eq!(suggestion.images(), vec!["new"]);
    }
}
