//! Image manifest wire types.

use serde::{Deserialize, Serialize};

/// Docker image manifest, schema 2.
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list (multi-platform). Not mirrored.
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image manifest.
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index (multi-platform). Not mirrored.
pub const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Manifest media types the mirror can copy.
pub const SUPPORTED_MANIFEST_TYPES: &[&str] = &[DOCKER_MANIFEST_V2, OCI_MANIFEST_V1];

/// Image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version.
    pub schema_version: u32,
    /// Media type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Config descriptor.
    pub config: LayerDescriptor,
    /// Layer descriptors, base layer first.
    pub layers: Vec<LayerDescriptor>,
}

/// Content descriptor. Identity is the digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Content digest (e.g. `sha256:...`).
    pub digest: String,
}

impl Manifest {
    /// Total declared size of all layers, saturating at `u64::MAX`.
    pub fn total_layer_size(&self) -> u64 {
        self.layers.iter().map(|l| l.size).fold(0, u64::saturating_add)
    }
}

pub(crate) fn is_supported_media_type(media_type: &str) -> bool {
    SUPPORTED_MANIFEST_TYPES.contains(&media_type)
}
