//! Image references.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ResolutionError;

/// Tag used when a reference names none.
pub const DEFAULT_TAG: &str = "latest";

/// An image name plus the tag (or digest) selecting one manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Repository name as written by the user (e.g. `nginx`, `myorg/app`).
    pub name: String,
    /// Tag or `sha256:` digest.
    pub tag: String,
}

impl ImageReference {
    /// Build a reference from parts.
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Parse `name`, `name:tag` or `name@digest`.
    ///
    /// A `:` followed by a `/` belongs to a registry port, not a tag:
    /// `localhost:5000/app` parses to name `localhost:5000/app`, tag `latest`.
    pub fn parse(reference: &str) -> Result<Self, ResolutionError> {
        let invalid = |reason: &str| ResolutionError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty reference"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(invalid("whitespace in reference"));
        }

        // A digest pins the manifest; any tag written before it is dropped.
        let (name, tag) = match trimmed.rsplit_once('@') {
            Some((named, digest)) => match split_tag(named) {
                (_, Some("")) => return Err(invalid("empty tag")),
                (name, _) => (name, digest),
            },
            None => match split_tag(trimmed) {
                (name, Some(tag)) => (name, tag),
                (name, None) => (name, DEFAULT_TAG),
            },
        };

        if name.is_empty() {
            return Err(invalid("empty image name"));
        }
        if tag.is_empty() {
            return Err(invalid("empty tag"));
        }
        if name.starts_with('/') || name.ends_with('/') || name.contains("//") {
            return Err(invalid("malformed repository path"));
        }

        Ok(Self::new(name, tag))
    }

    /// Repository path used on the wire.
    ///
    /// Single-component names live under `library/` on Docker Hub.
    pub fn repository(&self) -> String {
        if self.name.contains('/') {
            self.name.clone()
        } else {
            format!("library/{}", self.name)
        }
    }

    /// Whether the reference pins a digest rather than a tag.
    pub fn is_digest(&self) -> bool {
        self.tag.contains(':')
    }
}

/// Split `name[:tag]`, leaving a registry port (`host:5000/app`) in the name.
fn split_tag(reference: &str) -> (&str, Option<&str>) {
    match reference.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, Some(tag)),
        _ => (reference, None),
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_digest() {
            write!(f, "{}@{}", self.name, self.tag)
        } else {
            write!(f, "{}:{}", self.name, self.tag)
        }
    }
}

impl FromStr for ImageReference {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("nginx", "nginx", "latest")]
    #[case("nginx:1.25", "nginx", "1.25")]
    #[case("tensorflow/tensorflow:2.11.0", "tensorflow/tensorflow", "2.11.0")]
    #[case("postgres:15-alpine", "postgres", "15-alpine")]
    #[case("localhost:5000/app", "localhost:5000/app", "latest")]
    #[case("localhost:5000/app:dev", "localhost:5000/app", "dev")]
    #[case("alpine@sha256:abc123", "alpine", "sha256:abc123")]
    #[case("nginx:1.25@sha256:abc123", "nginx", "sha256:abc123")]
    #[case("localhost:5000/app@sha256:abc123", "localhost:5000/app", "sha256:abc123")]
    #[case("localhost:5000/app:dev@sha256:abc123", "localhost:5000/app", "sha256:abc123")]
    fn test_parse(#[case] input: &str, #[case] name: &str, #[case] tag: &str) {
        let reference = ImageReference::parse(input).unwrap();
        assert_eq!(reference.name, name);
        assert_eq!(reference.tag, tag);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case(":latest")]
    #[case("nginx:")]
    #[case("nginx:@sha256:abc123")]
    #[case("@sha256:abc123")]
    #[case("/nginx")]
    #[case("my image")]
    fn test_parse_rejects(#[case] input: &str) {
        assert!(matches!(
            ImageReference::parse(input),
            Err(ResolutionError::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_repository_adds_library_prefix() {
        assert_eq!(
            ImageReference::parse("nginx").unwrap().repository(),
            "library/nginx"
        );
        assert_eq!(
            ImageReference::parse("myorg/app:v1").unwrap().repository(),
            "myorg/app"
        );
        assert_eq!(
            ImageReference::parse("nginx:1.25@sha256:abc").unwrap().repository(),
            "library/nginx"
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ImageReference::parse("redis").unwrap().to_string(),
            "redis:latest"
        );
        assert_eq!(
            ImageReference::parse("alpine@sha256:abc").unwrap().to_string(),
            "alpine@sha256:abc"
        );
    }
}
