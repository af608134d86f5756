//! Image sync driver.
//!
//! Resolves a manifest, hands it to the transfer engine and records the
//! outcome in the ledger. Also owns the derived per-image state view.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use regmirror_ledger::{LedgerError, NewSyncAttempt, SyncAttempt, SyncLedger, SyncStatus};
use regmirror_registry::{ImageReference, ManifestResolver, RegistryClient};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::MirrorConfig;
use crate::error::{ConfigurationError, SyncError};
use crate::transfer::{LayerTransferEngine, RegistryTransport, TransferStats};

/// A successful sync.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Ledger key of the image (`name:tag`).
    pub image: String,
    pub stats: TransferStats,
    /// The ledger row written for it.
    pub attempt: SyncAttempt,
}

/// Where an image stands, derived from the ledger and in-flight syncs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ImageState {
    Unsynced,
    Syncing,
    Completed { at: DateTime<Utc> },
    Failed { cause: String, at: DateTime<Utc> },
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsynced => f.write_str("unsynced"),
            Self::Syncing => f.write_str("syncing"),
            Self::Completed { .. } => f.write_str("completed"),
            Self::Failed { cause, .. } => write!(f, "failed: {cause}"),
        }
    }
}

type InFlight = Arc<Mutex<HashSet<String>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<String>> {
    // The set is always left consistent, so a poisoned lock is still usable.
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the image from the in-flight set when the sync ends.
struct InFlightGuard {
    in_flight: InFlight,
    image: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.image);
    }
}

/// Drives image syncs from the source to the target registry.
pub struct Syncer {
    resolver: ManifestResolver,
    engine: LayerTransferEngine,
    ledger: Arc<dyn SyncLedger>,
    in_flight: InFlight,
}

impl Syncer {
    pub fn new(
        resolver: ManifestResolver,
        engine: LayerTransferEngine,
        ledger: Arc<dyn SyncLedger>,
    ) -> Self {
        Self {
            resolver,
            engine,
            ledger,
            in_flight: Arc::default(),
        }
    }

    /// Build the HTTP clients, resolver and engine described by `config`.
    pub fn from_config(
        config: &MirrorConfig,
        ledger: Arc<dyn SyncLedger>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let source = Arc::new(RegistryClient::new(config.source_config())?);
        let target = Arc::new(RegistryClient::new(config.target_config())?);
        let transport = Arc::new(RegistryTransport::new(Arc::clone(&source), target));
        let engine = LayerTransferEngine::new(transport, config.parallelism)?;

        Ok(Self::new(ManifestResolver::new(source), engine, ledger))
    }

    pub fn ledger(&self) -> &Arc<dyn SyncLedger> {
        &self.ledger
    }

    /// Mirror one image and record the attempt.
    ///
    /// Every attempt past reference parsing produces exactly one ledger row,
    /// including ones that fail to resolve.
    pub async fn sync(
        &self,
        image: &str,
        force: bool,
        cancel: watch::Receiver<bool>,
    ) -> Result<SyncOutcome, SyncError> {
        let reference = ImageReference::parse(image)?;
        let key = reference.to_string();
        let _guard = self.begin(&key)?;
        let start = Instant::now();

        info!(
            image = %key,
            force,
            parallelism = self.engine.parallelism(),
            "Starting sync"
        );

        let resolved = match self.resolver.resolve_reference(&reference).await {
            Ok(resolved) => resolved,
            Err(err) => {
                self.record_failure(NewSyncAttempt::failed(&key, &err, 0, start.elapsed()));
                return Err(err.into());
            }
        };

        let outcome = self.engine.transfer(&resolved, force, cancel).await;
        let stats = outcome.stats;
        let elapsed = start.elapsed();

        if let Some(err) = outcome.error {
            self.record_failure(NewSyncAttempt::failed(
                &key,
                &err,
                stats.bytes_synced,
                elapsed,
            ));
            return Err(SyncError::Transfer {
                image: key,
                source: err,
                stats,
            });
        }

        let attempt = self
            .ledger
            .append(NewSyncAttempt::completed(&key, stats.bytes_synced, elapsed))
            .map_err(|source| {
                error!(
                    image = %key,
                    bytes = stats.bytes_synced,
                    error = %source,
                    "Sync completed but could not be recorded"
                );
                SyncError::Ledger {
                    image: key.clone(),
                    source,
                }
            })?;

        info!(
            image = %key,
            layers = stats.layers_synced,
            skipped = stats.layers_skipped,
            bytes = stats.bytes_synced,
            duration_ms = elapsed.as_millis() as u64,
            "Sync completed"
        );

        Ok(SyncOutcome {
            image: key,
            stats,
            attempt,
        })
    }

    /// Sync `images` one after another, continuing past failures.
    ///
    /// Stops starting new syncs once `cancel` reads `true`.
    pub async fn sync_many<I, S>(
        &self,
        images: I,
        force: bool,
        cancel: watch::Receiver<bool>,
    ) -> Vec<(String, Result<SyncOutcome, SyncError>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut results = Vec::new();
        for image in images {
            if *cancel.borrow() {
                warn!("Cancelled, not starting further syncs");
                break;
            }
            let image = image.as_ref();
            let result = self.sync(image, force, cancel.clone()).await;
            if let Err(err) = &result {
                warn!(image = %image, error = %err, "Sync failed, continuing");
            }
            results.push((image.to_string(), result));
        }
        results
    }

    /// Current state of `image`.
    pub fn state(&self, image: &str) -> Result<ImageState, LedgerError> {
        let key = ImageReference::parse(image)
            .map(|r| r.to_string())
            .unwrap_or_else(|_| image.to_string());

        if lock(&self.in_flight).contains(&key) {
            return Ok(ImageState::Syncing);
        }

        Ok(match self.ledger.latest(&key)? {
            None => ImageState::Unsynced,
            Some(attempt) => match attempt.status {
                SyncStatus::Completed => ImageState::Completed {
                    at: attempt.timestamp,
                },
                SyncStatus::Failed(cause) => ImageState::Failed {
                    cause,
                    at: attempt.timestamp,
                },
            },
        })
    }

    fn begin(&self, key: &str) -> Result<InFlightGuard, SyncError> {
        if !lock(&self.in_flight).insert(key.to_string()) {
            return Err(SyncError::InProgress {
                image: key.to_string(),
            });
        }
        Ok(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            image: key.to_string(),
        })
    }

    /// Append a failed attempt. The failure itself stays the reported error.
    fn record_failure(&self, attempt: NewSyncAttempt) {
        warn!(image = %attempt.image, status = %attempt.status, "Sync failed");
        if let Err(e) = self.ledger.append(attempt) {
            error!(error = %e, "Failed to record failed sync");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use regmirror_ledger::{LedgerStats, MemoryLedger};
    use regmirror_registry::{RegistryConfig, DOCKER_MANIFEST_V2};
    use serde_json::json;
    use sha2::{Digest, Sha256};
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::error::TransferError;

    /// Ledger whose writes always fail.
    #[derive(Default)]
    struct BrokenLedger {
        appends: AtomicUsize,
    }

    impl SyncLedger for BrokenLedger {
        fn append(&self, _attempt: NewSyncAttempt) -> Result<SyncAttempt, LedgerError> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::Poisoned)
        }

        fn recent(&self, _limit: usize) -> Result<Vec<SyncAttempt>, LedgerError> {
            Ok(Vec::new())
        }

        fn latest(&self, _image: &str) -> Result<Option<SyncAttempt>, LedgerError> {
            Ok(None)
        }

        fn aggregate(&self) -> Result<LedgerStats, LedgerError> {
            Ok(LedgerStats::default())
        }
    }

    /// Serve a one-layer `nginx:latest` and accept pushes of it.
    async fn serve_single_layer(server: &MockServer, blob_status: u16) {
        let body = b"single layer".to_vec();
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(&body)));

        Mock::given(method("GET"))
            .and(path("/v2/library/nginx/manifests/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "schemaVersion": 2,
                "mediaType": DOCKER_MANIFEST_V2,
                "config": {
                    "mediaType": "application/vnd.docker.container.image.v1+json",
                    "size": 2,
                    "digest": "sha256:config"
                },
                "layers": [{
                    "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                    "size": body.len(),
                    "digest": digest,
                }],
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/v2/library/nginx/blobs/{digest}")))
            .respond_with(ResponseTemplate::new(blob_status).set_body_bytes(body))
            .mount(server)
            .await;
        Mock::given(method("HEAD"))
            .and(path_regex(r"^/v2/library/nginx/blobs/sha256:.+$"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/v2/library/nginx/blobs/sha256:.+$"))
            .respond_with(ResponseTemplate::new(201))
            .mount(server)
            .await;
    }

    async fn put_count(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "PUT")
            .count()
    }

    fn syncer(server: &MockServer, ledger: Arc<dyn SyncLedger>) -> Syncer {
        let client = Arc::new(RegistryClient::new(RegistryConfig::new(server.uri())).unwrap());
        let transport = Arc::new(RegistryTransport::new(client.clone(), client.clone()));
        Syncer::new(
            ManifestResolver::new(client),
            LayerTransferEngine::new(transport, 2).unwrap(),
            ledger,
        )
    }

    fn idle() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_invalid_reference_is_not_recorded() {
        let server = MockServer::start().await;
        let ledger = Arc::new(MemoryLedger::new());

        let err = syncer(&server, ledger.clone())
            .sync("nginx:", false, idle())
            .await
            .unwrap_err();

        assert!(err.image().is_none());
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_resolution_failure_is_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/library/nginx/manifests/latest"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let ledger = Arc::new(MemoryLedger::new());
        let syncer = syncer(&server, ledger.clone());

        let err = syncer.sync("nginx", false, idle()).await.unwrap_err();
        assert!(matches!(err, SyncError::Resolution(_)));

        let row = ledger.latest("nginx:latest").unwrap().unwrap();
        assert!(!row.status.is_completed());
        assert_eq!(row.bytes, 0);
        assert!(matches!(
            syncer.state("nginx").unwrap(),
            ImageState::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_unrecorded_success_reports_ledger_error() {
        let server = MockServer::start().await;
        serve_single_layer(&server, 200).await;
        let ledger = Arc::new(BrokenLedger::default());

        let err = syncer(&server, ledger.clone())
            .sync("nginx", false, idle())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Ledger { ref image, source: LedgerError::Poisoned } if image == "nginx:latest"
        ));
        assert_eq!(ledger.appends.load(Ordering::SeqCst), 1);
        assert_eq!(put_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_transfer_error_wins_over_ledger_error() {
        let server = MockServer::start().await;
        serve_single_layer(&server, 500).await;
        let ledger = Arc::new(BrokenLedger::default());

        let err = syncer(&server, ledger.clone())
            .sync("nginx", false, idle())
            .await
            .unwrap_err();

        match err {
            SyncError::Transfer { image, source, stats } => {
                assert_eq!(image, "nginx:latest");
                assert!(matches!(source, TransferError::Pull { .. }));
                assert_eq!(stats.bytes_synced, 0);
            }
            other => panic!("expected transfer error, got {other:?}"),
        }
        assert_eq!(ledger.appends.load(Ordering::SeqCst), 1);
        assert_eq!(put_count(&server).await, 0);
    }

    #[test]
    fn test_in_flight_guard() {
        let in_flight: InFlight = Arc::default();
        let ledger: Arc<dyn SyncLedger> = Arc::new(MemoryLedger::new());
        let client = Arc::new(RegistryClient::new(RegistryConfig::default()).unwrap());
        let transport = Arc::new(RegistryTransport::new(client.clone(), client.clone()));
        let syncer = Syncer {
            resolver: ManifestResolver::new(client),
            engine: LayerTransferEngine::new(transport, 1).unwrap(),
            ledger,
            in_flight: in_flight.clone(),
        };

        let guard = syncer.begin("redis:latest").unwrap();
        assert_eq!(syncer.state("redis").unwrap(), ImageState::Syncing);
        assert!(matches!(
            syncer.begin("redis:latest"),
            Err(SyncError::InProgress { .. })
        ));

        drop(guard);
        assert!(lock(&in_flight).is_empty());
        assert_eq!(syncer.state("redis").unwrap(), ImageState::Unsynced);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ImageState::Unsynced.to_string(), "unsynced");
        assert_eq!(
            ImageState::Failed {
                cause: "timeout".to_string(),
                at: Utc::now()
            }
            .to_string(),
            "failed: timeout"
        );
    }
}
