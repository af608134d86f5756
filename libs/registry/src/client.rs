//! Registry HTTP client.
//!
//! One client talks to one registry. The mirror holds two: a read-side client
//! for the source and a write-side client for the target.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Body, Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::manifest::SUPPORTED_MANIFEST_TYPES;
use crate::RegistryError;

/// Byte stream of one blob.
pub type BlobStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send + 'static>>;

/// A blob being pulled.
pub struct Blob {
    /// `Content-Length` reported by the source, if any.
    pub size: Option<u64>,
    /// Body, verified against its digest as it is read.
    pub stream: BlobStream,
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob").field("size", &self.size).finish()
    }
}

/// How blobs are written to a target registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStrategy {
    /// Single `PUT /v2/<repo>/blobs/<digest>` carrying the bytes.
    #[default]
    Direct,
    /// `POST /v2/<repo>/blobs/uploads/` then `PUT <location>?digest=<digest>`.
    Upload,
}

impl fmt::Display for PushStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Upload => f.write_str("upload"),
        }
    }
}

impl FromStr for PushStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "upload" => Ok(Self::Upload),
            other => Err(format!("unknown push strategy: {other}")),
        }
    }
}

/// Configuration for one registry endpoint.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL with scheme (e.g. `https://registry-1.docker.io`).
    pub base_url: String,
    /// Timeout for manifest, HEAD and upload-session requests.
    /// Blob bodies are not bounded by it.
    pub request_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// How blobs are pushed when this registry is a target.
    pub push_strategy: PushStrategy,
}

impl RegistryConfig {
    /// Configuration for `base_url` with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://registry-1.docker.io".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            push_strategy: PushStrategy::Direct,
        }
    }
}

/// Normalize a registry address into a base URL.
///
/// Addresses without a scheme get `default_scheme`; a trailing `/` is dropped.
pub fn registry_url(address: &str, default_scheme: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("{default_scheme}://{address}")
    }
}

/// Raw manifest response.
#[derive(Debug, Clone)]
pub struct ManifestResponse {
    /// `Content-Type` of the response, if any.
    pub content_type: Option<String>,
    /// Body bytes.
    pub body: Bytes,
}

/// Distribution API client.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    config: RegistryConfig,
    client: Client,
}

impl RegistryClient {
    /// Create a new client.
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self { config, client })
    }

    /// Base URL of this registry.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Probe `/v2/`. Returns the status; 200 and 401 both mean the API is up.
    pub async fn ping(&self) -> Result<StatusCode, RegistryError> {
        let url = format!("{}/v2/", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        Ok(response.status())
    }

    /// Fetch the manifest bytes for `repo` at `reference`.
    pub async fn get_manifest(
        &self,
        repo: &str,
        reference: &str,
    ) -> Result<ManifestResponse, RegistryError> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.config.base_url, repo, reference
        );

        debug!(url = %url, "Fetching manifest");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, SUPPORTED_MANIFEST_TYPES.join(", "))
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
                let body = response.bytes().await?;
                Ok(ManifestResponse { content_type, body })
            }
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound(format!("{repo}:{reference}"))),
            status => Err(RegistryError::UnexpectedStatus {
                operation: "manifest fetch",
                status,
            }),
        }
    }

    /// Open a blob for streaming. The returned stream fails at its end if the
    /// content does not hash to a `sha256:` digest.
    pub async fn pull_blob(&self, repo: &str, digest: &str) -> Result<Blob, RegistryError> {
        let url = format!("{}/v2/{}/blobs/{}", self.config.base_url, repo, digest);

        debug!(url = %url, "Pulling blob");

        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let size = response.content_length();
                let body = response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other));
                Ok(Blob {
                    size,
                    stream: verify_digest(Box::pin(body), digest),
                })
            }
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound(digest.to_string())),
            status => Err(RegistryError::UnexpectedStatus {
                operation: "blob pull",
                status,
            }),
        }
    }

    /// Whether the registry already holds `digest` under `repo`.
    pub async fn blob_exists(&self, repo: &str, digest: &str) -> Result<bool, RegistryError> {
        let url = format!("{}/v2/{}/blobs/{}", self.config.base_url, repo, digest);

        let response = self
            .client
            .head(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(RegistryError::UnexpectedStatus {
                operation: "blob existence check",
                status,
            }),
        }
    }

    /// Write a blob addressed by `digest`. Pushing a digest that already
    /// exists is harmless; the registry keys content by digest.
    pub async fn push_blob(
        &self,
        repo: &str,
        digest: &str,
        body: BlobStream,
    ) -> Result<(), RegistryError> {
        match self.config.push_strategy {
            PushStrategy::Direct => self.push_direct(repo, digest, body).await,
            PushStrategy::Upload => self.push_upload(repo, digest, body).await,
        }
    }

    async fn push_direct(
        &self,
        repo: &str,
        digest: &str,
        body: BlobStream,
    ) -> Result<(), RegistryError> {
        let url = format!("{}/v2/{}/blobs/{}", self.config.base_url, repo, digest);

        debug!(url = %url, "Pushing blob");

        let response = self
            .client
            .put(&url)
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED => Ok(()),
            status => Err(RegistryError::UnexpectedStatus {
                operation: "blob push",
                status,
            }),
        }
    }

    async fn push_upload(
        &self,
        repo: &str,
        digest: &str,
        body: BlobStream,
    ) -> Result<(), RegistryError> {
        let start_url = format!("{}/v2/{}/blobs/uploads/", self.config.base_url, repo);

        debug!(url = %start_url, "Starting blob upload");

        let response = self
            .client
            .post(&start_url)
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(RegistryError::UnexpectedStatus {
                operation: "upload session start",
                status: response.status(),
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(RegistryError::MissingLocation)?;

        let mut upload_url = upload_url(&start_url, location)?;
        upload_url.query_pairs_mut().append_pair("digest", digest);

        debug!(url = %upload_url, "Completing blob upload");

        let response = self
            .client
            .put(upload_url)
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED => Ok(()),
            status => Err(RegistryError::UnexpectedStatus {
                operation: "upload completion",
                status,
            }),
        }
    }
}

/// Resolve an upload `Location`, which registries may send relative.
fn upload_url(base: &str, location: &str) -> Result<Url, RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidUrl {
        url: location.to_string(),
        reason,
    };
    let base = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    base.join(location).map_err(|e| invalid(e.to_string()))
}

/// Wrap a blob stream so it errors at end-of-stream on a digest mismatch.
///
/// Only `sha256:` digests are checked; other algorithms pass through.
fn verify_digest(inner: BlobStream, digest: &str) -> BlobStream {
    let Some(expected) = digest.strip_prefix("sha256:") else {
        return inner;
    };
    let expected = expected.to_ascii_lowercase();

    Box::pin(stream::try_unfold(
        (inner, Some(Sha256::new()), expected),
        |(mut inner, mut hasher, expected)| async move {
            match inner.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    if let Some(hasher) = hasher.as_mut() {
                        hasher.update(&chunk);
                    }
                    Ok(Some((chunk, (inner, hasher, expected))))
                }
                None => {
                    if let Some(hasher) = hasher.take() {
                        let actual = hex::encode(hasher.finalize());
                        if actual != expected {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("digest mismatch: expected sha256:{expected}, got sha256:{actual}"),
                            ));
                        }
                    }
                    Ok(None)
                }
            }
        },
    ))
}
