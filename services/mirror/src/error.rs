//! Error types for mirroring.

use regmirror_ledger::LedgerError;
use regmirror_registry::{RegistryError, ResolutionError};
use thiserror::Error;

use crate::transfer::TransferStats;

/// Failure of one layer's transfer unit.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to pull layer {digest}: {source}")]
    Pull {
        digest: String,
        #[source]
        source: RegistryError,
    },

    #[error("failed to push layer {digest}: {source}")]
    Push {
        digest: String,
        #[source]
        source: RegistryError,
    },

    #[error("transfer of layer {digest} cancelled")]
    Cancelled { digest: String },

    #[error("transfer of layer {digest} aborted: {reason}")]
    Aborted { digest: String, reason: String },
}

impl TransferError {
    /// Digest of the layer that failed.
    pub fn digest(&self) -> &str {
        match self {
            Self::Pull { digest, .. }
            | Self::Push { digest, .. }
            | Self::Cancelled { digest }
            | Self::Aborted { digest, .. } => digest,
        }
    }

    /// Whether the unit stopped because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("parallelism must be at least 1, got {0}")]
    InvalidParallelism(usize),

    #[error("cache budget must be greater than zero")]
    InvalidBudget,

    #[error("unknown cache policy {0:?} (expected LRU or FIFO)")]
    InvalidPolicy(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("failed to build registry client: {0}")]
    Client(#[from] RegistryError),
}

/// Errors from a whole image sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The manifest could not be resolved; no layer was touched.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// At least one layer failed. `stats` still reflects the layers that made it.
    #[error("sync of {image} failed: {source}")]
    Transfer {
        image: String,
        #[source]
        source: TransferError,
        stats: TransferStats,
    },

    /// The transfer finished but its outcome could not be recorded.
    #[error("failed to record sync of {image}: {source}")]
    Ledger {
        image: String,
        #[source]
        source: LedgerError,
    },

    #[error("{image} is already being synced")]
    InProgress { image: String },
}

impl SyncError {
    /// Image the error is about, when known.
    pub fn image(&self) -> Option<&str> {
        match self {
            Self::Resolution(ResolutionError::InvalidReference { .. }) => None,
            Self::Resolution(
                ResolutionError::NotFound { image }
                | ResolutionError::Status { image, .. }
                | ResolutionError::Decode { image, .. }
                | ResolutionError::Unsupported { image, .. }
                | ResolutionError::Transport { image, .. },
            ) => Some(image),
            Self::Transfer { image, .. } | Self::Ledger { image, .. } | Self::InProgress { image } => {
                Some(image)
            }
        }
    }
}
