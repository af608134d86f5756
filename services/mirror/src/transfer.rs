//! Concurrent layer transfer.
//!
//! One transfer unit per layer, each streaming its blob from the source to the
//! target. At most `parallelism` units do network work at a time. Every unit
//! runs to completion (or cancellation) even when a sibling fails; the call
//! returns only after all of them have joined.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regmirror_registry::{LayerDescriptor, RegistryClient, RegistryError, ResolvedManifest};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{ConfigurationError, TransferError};

/// Moves individual blobs between registries.
#[async_trait]
pub trait LayerTransport: Send + Sync {
    /// Whether the target already holds `layer`.
    async fn blob_exists(&self, repo: &str, layer: &LayerDescriptor)
        -> Result<bool, RegistryError>;

    /// Stream `layer` from the source into the target.
    async fn copy_blob(&self, repo: &str, layer: &LayerDescriptor) -> Result<(), TransferError>;
}

/// HTTP transport between a source and a target registry.
#[derive(Debug, Clone)]
pub struct RegistryTransport {
    source: Arc<RegistryClient>,
    target: Arc<RegistryClient>,
}

impl RegistryTransport {
    pub fn new(source: Arc<RegistryClient>, target: Arc<RegistryClient>) -> Self {
        Self { source, target }
    }
}

#[async_trait]
impl LayerTransport for RegistryTransport {
    async fn blob_exists(
        &self,
        repo: &str,
        layer: &LayerDescriptor,
    ) -> Result<bool, RegistryError> {
        self.target.blob_exists(repo, &layer.digest).await
    }

    async fn copy_blob(&self, repo: &str, layer: &LayerDescriptor) -> Result<(), TransferError> {
        let blob = self
            .source
            .pull_blob(repo, &layer.digest)
            .await
            .map_err(|source| TransferError::Pull {
                digest: layer.digest.clone(),
                source,
            })?;

        if let Some(size) = blob.size {
            if size != layer.size {
                debug!(
                    digest = %layer.digest,
                    declared = layer.size,
                    actual = size,
                    "Blob size differs from manifest"
                );
            }
        }

        self.target
            .push_blob(repo, &layer.digest, blob.stream)
            .await
            .map_err(|source| TransferError::Push {
                digest: layer.digest.clone(),
                source,
            })
    }
}

/// Live counters shared by the units of one transfer.
#[derive(Debug, Default)]
pub(crate) struct SyncProgress {
    layers_total: usize,
    bytes_total: u64,
    layers_synced: AtomicUsize,
    layers_skipped: AtomicUsize,
    bytes_synced: AtomicU64,
}

impl SyncProgress {
    fn new(layers: &[LayerDescriptor]) -> Self {
        Self {
            layers_total: layers.len(),
            bytes_total: layers.iter().map(|l| l.size).fold(0, u64::saturating_add),
            ..Default::default()
        }
    }

    fn record_copied(&self, bytes: u64) {
        self.layers_synced.fetch_add(1, Ordering::Relaxed);
        // Sizes come from a remote manifest; clamp rather than wrap.
        let _ = self
            .bytes_synced
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| {
                Some(b.saturating_add(bytes))
            });
    }

    fn record_skipped(&self) {
        self.layers_synced.fetch_add(1, Ordering::Relaxed);
        self.layers_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    fn snapshot(&self, elapsed: Duration) -> TransferStats {
        TransferStats {
            layers_total: self.layers_total,
            layers_synced: self.layers_synced.load(Ordering::Relaxed),
            layers_skipped: self.layers_skipped.load(Ordering::Relaxed),
            bytes_total: self.bytes_total,
            bytes_synced: self.bytes_synced.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Counters of a finished transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Layers in the manifest.
    pub layers_total: usize,
    /// Layers now present at the target, skipped ones included.
    pub layers_synced: usize,
    /// Layers found already present and not copied.
    pub layers_skipped: usize,
    /// Declared size of all layers.
    pub bytes_total: u64,
    /// Declared size of the layers actually copied.
    pub bytes_synced: u64,
    /// Wall time from dispatch to the last join.
    pub elapsed: Duration,
}

/// Result of [`LayerTransferEngine::transfer`]: the counters always, plus
/// the error of the lowest-indexed failing layer, if any.
#[derive(Debug)]
pub struct TransferOutcome {
    pub stats: TransferStats,
    pub error: Option<TransferError>,
}

/// Copies the layers of one manifest with bounded concurrency.
#[derive(Clone)]
pub struct LayerTransferEngine {
    transport: Arc<dyn LayerTransport>,
    parallelism: usize,
}

impl LayerTransferEngine {
    /// Create an engine running at most `parallelism` units at once.
    pub fn new(
        transport: Arc<dyn LayerTransport>,
        parallelism: usize,
    ) -> Result<Self, ConfigurationError> {
        if parallelism == 0 {
            return Err(ConfigurationError::InvalidParallelism(parallelism));
        }
        Ok(Self {
            transport,
            parallelism,
        })
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Transfer every layer of `resolved` to the target.
    ///
    /// Unless `force` is set, layers the target already holds are skipped.
    /// Flipping `cancel` to `true` stops units at their next suspension point.
    pub async fn transfer(
        &self,
        resolved: &ResolvedManifest,
        force: bool,
        cancel: watch::Receiver<bool>,
    ) -> TransferOutcome {
        let layers = &resolved.manifest.layers;
        let repo = resolved.reference.repository();
        let progress = Arc::new(SyncProgress::new(layers));
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let start = Instant::now();

        info!(
            image = %resolved.reference,
            layers = layers.len(),
            bytes = progress.bytes_total,
            parallelism = self.parallelism,
            "Transferring layers"
        );

        let handles: Vec<_> = layers
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, layer)| {
                let unit = TransferUnit {
                    index,
                    repo: repo.clone(),
                    layer,
                    force,
                    transport: Arc::clone(&self.transport),
                    semaphore: Arc::clone(&semaphore),
                    progress: Arc::clone(&progress),
                };
                tokio::spawn(unit.run(cancel.clone()))
            })
            .collect();

        // Joined in index order, so the first failure seen has the lowest index.
        let mut error = None;
        for (index, handle) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(TransferError::Aborted {
                    digest: layers[index].digest.clone(),
                    reason: join_err.to_string(),
                }),
            };
            if let Err(err) = result {
                warn!(
                    image = %resolved.reference,
                    layer = index,
                    digest = %err.digest(),
                    error = %err,
                    "Layer transfer failed"
                );
                error.get_or_insert(err);
            }
        }

        let stats = progress.snapshot(start.elapsed());

        if error.is_none() {
            info!(
                image = %resolved.reference,
                layers_synced = stats.layers_synced,
                layers_skipped = stats.layers_skipped,
                bytes = stats.bytes_synced,
                duration_ms = stats.elapsed.as_millis() as u64,
                "Layers transferred"
            );
        }

        TransferOutcome { stats, error }
    }
}

/// Everything one spawned unit owns.
struct TransferUnit {
    index: usize,
    repo: String,
    layer: LayerDescriptor,
    force: bool,
    transport: Arc<dyn LayerTransport>,
    semaphore: Arc<Semaphore>,
    progress: Arc<SyncProgress>,
}

impl TransferUnit {
    async fn run(self, mut cancel: watch::Receiver<bool>) -> Result<(), TransferError> {
        let cancelled = || TransferError::Cancelled {
            digest: self.layer.digest.clone(),
        };

        if *cancel.borrow() {
            return Err(cancelled());
        }

        tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => Err(cancelled()),
            result = self.work() => result,
        }
    }

    async fn work(&self) -> Result<(), TransferError> {
        let _permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| TransferError::Aborted {
                digest: self.layer.digest.clone(),
                reason: e.to_string(),
            })?;

        if !self.force {
            match self.transport.blob_exists(&self.repo, &self.layer).await {
                Ok(true) => {
                    debug!(
                        layer = self.index,
                        digest = %self.layer.digest,
                        "Layer already present, skipping"
                    );
                    self.progress.record_skipped();
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => {
                    // Fall through to a copy; the push is idempotent by digest.
                    debug!(
                        layer = self.index,
                        digest = %self.layer.digest,
                        error = %e,
                        "Existence check failed"
                    );
                }
            }
        }

        debug!(
            layer = self.index,
            digest = %self.layer.digest,
            size = self.layer.size,
            "Copying layer"
        );

        self.transport.copy_blob(&self.repo, &self.layer).await?;
        self.progress.record_copied(self.layer.size);

        Ok(())
    }
}

/// Resolves once `cancel` reads `true`. Never resolves if the sender is gone.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
