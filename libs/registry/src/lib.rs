//! # regmirror-registry
//!
//! Client side of the registry distribution protocol, as needed for
//! mirroring:
//!
//! - Parsing image references (`name[:tag]`, `name@digest`)
//! - Resolving manifests from the source registry
//! - Streaming blobs out of the source and into the target, addressed by digest
//!
//! Reference: https://github.com/opencontainers/distribution-spec

mod client;
mod error;
mod manifest;
mod reference;
mod resolver;

pub use client::{
    registry_url, Blob, BlobStream, ManifestResponse, PushStrategy, RegistryClient, RegistryConfig,
};
pub use error::{RegistryError, ResolutionError};
pub use manifest::{
    LayerDescriptor, Manifest, DOCKER_MANIFEST_LIST_V2, DOCKER_MANIFEST_V2, OCI_IMAGE_INDEX,
    OCI_MANIFEST_V1, SUPPORTED_MANIFEST_TYPES,
};
pub use reference::{ImageReference, DEFAULT_TAG};
pub use resolver::{ManifestResolver, ResolvedManifest};

pub use reqwest::StatusCode;
