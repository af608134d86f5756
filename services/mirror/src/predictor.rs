//! Prefetch prediction.

use std::collections::HashSet;
use std::sync::Arc;

use regmirror_ledger::{LedgerError, SyncLedger};
use regmirror_registry::{ImageReference, ResolutionError};
use serde::Serialize;
use tracing::debug;

/// Images worth mirroring ahead of demand, in preference order.
pub trait CandidatePool: Send + Sync {
    fn candidates(&self) -> Vec<ImageReference>;
}

/// A fixed, ordered candidate list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticPool {
    images: Vec<ImageReference>,
}

impl StaticPool {
    pub fn new(images: Vec<ImageReference>) -> Self {
        Self { images }
    }

    /// Parse each entry as an image reference.
    pub fn parse<I, S>(images: I) -> Result<Self, ResolutionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let images = images
            .into_iter()
            .map(|s| ImageReference::parse(s.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { images })
    }

    /// Commonly pulled public images.
    pub fn popular() -> Self {
        let images = [
            ("nginx", "latest"),
            ("alpine", "latest"),
            ("ubuntu", "latest"),
            ("postgres", "latest"),
            ("redis", "latest"),
            ("node", "lts"),
            ("python", "3.9"),
            ("golang", "latest"),
            ("mysql", "8.0"),
            ("mongo", "latest"),
        ];
        Self::new(
            images
                .into_iter()
                .map(|(name, tag)| ImageReference::new(name, tag))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl CandidatePool for StaticPool {
    fn candidates(&self) -> Vec<ImageReference> {
        self.images.clone()
    }
}

/// An image proposed for prefetch. `rank` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefetchCandidate {
    pub image: ImageReference,
    pub rank: usize,
}

/// Ranks pool images that have not been mirrored successfully.
pub struct PrefetchPredictor {
    ledger: Arc<dyn SyncLedger>,
    pool: Arc<dyn CandidatePool>,
}

impl PrefetchPredictor {
    pub fn new(ledger: Arc<dyn SyncLedger>, pool: Arc<dyn CandidatePool>) -> Self {
        Self { ledger, pool }
    }

    /// Up to `count` pool images whose latest attempt is not `completed`,
    /// in pool order. Duplicate pool entries are returned once.
    pub fn predict(&self, count: usize) -> Result<Vec<PrefetchCandidate>, LedgerError> {
        let mut seen = HashSet::new();
        let mut predicted = Vec::new();

        for image in self.pool.candidates() {
            if predicted.len() >= count {
                break;
            }

            let key = image.to_string();
            if !seen.insert(key.clone()) {
                continue;
            }

            let mirrored = self
                .ledger
                .latest(&key)?
                .is_some_and(|attempt| attempt.status.is_completed());
            if mirrored {
                debug!(image = %key, "Already mirrored, not a prefetch candidate");
                continue;
            }

            predicted.push(PrefetchCandidate {
                image,
                rank: predicted.len() + 1,
            });
        }

        Ok(predicted)
    }
}
