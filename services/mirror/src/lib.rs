//! # regmirror-mirror
//!
//! Mirrors container images from a source registry into a local target
//! registry and keeps the local cache within budget.
//!
//! ## Components
//!
//! - [`LayerTransferEngine`]: bounded-concurrency copy of a manifest's layers
//! - [`Syncer`]: resolve, transfer and record one image at a time
//! - [`CacheCapacityManager`]: advisory eviction planning against a byte budget
//! - [`PrefetchPredictor`]: ranks images worth mirroring before they are asked for
//! - [`Analyzer`]: bandwidth and time-saved report from the ledger
//!
//! All of them take their collaborators and settings through constructors;
//! [`MirrorConfig`] is the one place configuration is read.

pub mod analytics;
pub mod capacity;
pub mod config;
pub mod error;
pub mod predictor;
pub mod sync;
pub mod transfer;

pub use analytics::{Analyzer, Report, BASELINE_MIB_PER_SEC};
pub use capacity::{
    plan_eviction, CacheBudget, CacheCapacityManager, CachePolicy, EvictionCandidate,
    EvictionSuggestion,
};
pub use config::{default_ledger_path, MirrorConfig};
pub use error::{ConfigurationError, SyncError, TransferError};
pub use predictor::{CandidatePool, PrefetchCandidate, PrefetchPredictor, StaticPool};
pub use sync::{ImageState, SyncOutcome, Syncer};
pub use transfer::{
    LayerTransferEngine, LayerTransport, RegistryTransport, TransferOutcome, TransferStats,
};
