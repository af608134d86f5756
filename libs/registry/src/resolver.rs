//! Manifest resolution.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::manifest::is_supported_media_type;
use crate::{ImageReference, Manifest, RegistryClient, ResolutionError};

/// A manifest together with the reference it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedManifest {
    /// The image that was resolved.
    pub reference: ImageReference,
    /// Manifest as fetched, validated for schema and media type.
    pub manifest: Manifest,
}

/// Just enough of a manifest to decide whether it is one we understand.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestHeader {
    schema_version: Option<u32>,
    media_type: Option<String>,
}

/// Resolves image references against the source registry.
///
/// Stateless per call and never retries; retrying is the caller's decision.
#[derive(Debug, Clone)]
pub struct ManifestResolver {
    client: Arc<RegistryClient>,
}

impl ManifestResolver {
    /// Create a resolver reading from `client`.
    pub fn new(client: Arc<RegistryClient>) -> Self {
        Self { client }
    }

    /// Parse `image` and resolve it.
    pub async fn resolve(&self, image: &str) -> Result<ResolvedManifest, ResolutionError> {
        let reference = ImageReference::parse(image)?;
        self.resolve_reference(&reference).await
    }

    /// Resolve an already-parsed reference.
    pub async fn resolve_reference(
        &self,
        reference: &ImageReference,
    ) -> Result<ResolvedManifest, ResolutionError> {
        let image = reference.to_string();
        let repo = reference.repository();

        debug!(image = %image, repo = %repo, "Resolving manifest");

        let response = self
            .client
            .get_manifest(&repo, &reference.tag)
            .await
            .map_err(|e| ResolutionError::from_registry(&image, e))?;

        let decode = |source| ResolutionError::Decode {
            image: image.clone(),
            source,
        };
        let unsupported = |reason: String| ResolutionError::Unsupported {
            image: image.clone(),
            reason,
        };

        let header: ManifestHeader = serde_json::from_slice(&response.body).map_err(decode)?;

        match header.schema_version {
            Some(2) => {}
            Some(v) => return Err(unsupported(format!("schema version {v}"))),
            None => return Err(unsupported("missing schema version".to_string())),
        }

        // Generic types like application/json say nothing about the manifest kind.
        let media_type = header.media_type.or(response
            .content_type
            .filter(|ct| ct.starts_with("application/vnd.")));
        if let Some(media_type) = media_type.as_deref() {
            if !is_supported_media_type(media_type) {
                return Err(unsupported(format!("media type {media_type}")));
            }
        }

        let mut manifest: Manifest = serde_json::from_slice(&response.body).map_err(decode)?;
        if manifest.media_type.is_none() {
            manifest.media_type = media_type;
        }

        info!(
            image = %image,
            layer_count = manifest.layers.len(),
            total_bytes = manifest.total_layer_size(),
            "Manifest resolved"
        );

        Ok(ResolvedManifest {
            reference: reference.clone(),
            manifest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RegistryConfig, DOCKER_MANIFEST_LIST_V2, DOCKER_MANIFEST_V2};
    use reqwest::StatusCode;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver_for(server: &MockServer) -> ManifestResolver {
        let client = RegistryClient::new(RegistryConfig::new(server.uri())).unwrap();
        ManifestResolver::new(Arc::new(client))
    }

    fn manifest_body() -> serde_json::Value {
        json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_V2,
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "size": 7023,
                "digest": "sha256:config"
            },
            "layers": [
                {
                    "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                    "size": 32654,
                    "digest": "sha256:base"
                },
                {
                    "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                    "size": 16724,
                    "digest": "sha256:app"
                }
            ]
        })
    }

    async fn serve_manifest(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/v2/library/nginx/manifests/1.25"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_resolve_preserves_layer_order() {
        let server = MockServer::start().await;
        serve_manifest(
            &server,
            ResponseTemplate::new(200).set_body_json(manifest_body()),
        )
        .await;

        let resolved = resolver_for(&server).resolve("nginx:1.25").await.unwrap();
        assert_eq!(resolved.reference, ImageReference::new("nginx", "1.25"));

        let digests: Vec<_> = resolved
            .manifest
            .layers
            .iter()
            .map(|l| l.digest.as_str())
            .collect();
        assert_eq!(digests, vec!["sha256:base", "sha256:app"]);
        assert_eq!(resolved.manifest.total_layer_size(), 32654 + 16724);
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let server = MockServer::start().await;
        serve_manifest(&server, ResponseTemplate::new(404)).await;

        let err = resolver_for(&server)
            .resolve("nginx:1.25")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound { ref image } if image == "nginx:1.25"));
    }

    #[tokio::test]
    async fn test_resolve_server_error() {
        let server = MockServer::start().await;
        serve_manifest(&server, ResponseTemplate::new(503)).await;

        let err = resolver_for(&server)
            .resolve("nginx:1.25")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_resolve_decode_failure() {
        let server = MockServer::start().await;
        serve_manifest(&server, ResponseTemplate::new(200).set_body_string("not json")).await;

        let err = resolver_for(&server)
            .resolve("nginx:1.25")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_resolve_rejects_manifest_list() {
        let server = MockServer::start().await;
        serve_manifest(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({
                "schemaVersion": 2,
                "mediaType": DOCKER_MANIFEST_LIST_V2,
                "manifests": []
            })),
        )
        .await;

        let err = resolver_for(&server)
            .resolve("nginx:1.25")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_resolve_rejects_schema_v1() {
        let server = MockServer::start().await;
        let mut body = manifest_body();
        body["schemaVersion"] = json!(1);
        serve_manifest(&server, ResponseTemplate::new(200).set_body_json(body)).await;

        let err = resolver_for(&server)
            .resolve("nginx:1.25")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_resolve_uses_content_type_when_body_omits_media_type() {
        let server = MockServer::start().await;
        let mut body = manifest_body();
        body.as_object_mut().unwrap().remove("mediaType");
        serve_manifest(
            &server,
            ResponseTemplate::new(200).set_body_raw(body.to_string(), crate::OCI_MANIFEST_V1),
        )
        .await;

        let resolved = resolver_for(&server).resolve("nginx:1.25").await.unwrap();
        assert_eq!(
            resolved.manifest.media_type.as_deref(),
            Some(crate::OCI_MANIFEST_V1)
        );
    }

    #[tokio::test]
    async fn test_resolve_invalid_reference_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = resolver_for(&server).resolve("nginx:").await.unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidReference { .. }));
    }
}
