//! Error types for registry operations.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors from a single registry request.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{operation} returned unexpected status {status}")]
    UnexpectedStatus {
        operation: &'static str,
        status: StatusCode,
    },

    #[error("upload session response carried no Location header")]
    MissingLocation,

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl RegistryError {
    /// HTTP status behind this error, if it came from a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::NotFound(_) => Some(StatusCode::NOT_FOUND),
            Self::Http(e) => e.status(),
            _ => None,
        }
    }
}

/// Failure to turn an image reference into a usable manifest.
///
/// Raised before any layer transfer starts.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("manifest for {image} not found")]
    NotFound { image: String },

    #[error("manifest request for {image} failed with status {status}")]
    Status { image: String, status: StatusCode },

    #[error("failed to decode manifest for {image}: {source}")]
    Decode {
        image: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported manifest for {image}: {reason}")]
    Unsupported { image: String, reason: String },

    #[error("failed to fetch manifest for {image}: {source}")]
    Transport {
        image: String,
        #[source]
        source: RegistryError,
    },
}

impl ResolutionError {
    pub(crate) fn from_registry(image: &str, err: RegistryError) -> Self {
        let image = image.to_string();
        match err {
            RegistryError::NotFound(_) => Self::NotFound { image },
            RegistryError::UnexpectedStatus { status, .. } => Self::Status { image, status },
            source => Self::Transport { image, source },
        }
    }
}
