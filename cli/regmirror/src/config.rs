//! Config file overlay.
//!
//! The optional JSON file sits between built-in defaults and the
//! `REGISTRY_MIRROR_*` environment; command-line flags win over both.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use regmirror_mirror::{CachePolicy, MirrorConfig};
use regmirror_registry::PushStrategy;
use serde::{Deserialize, Serialize};

/// Configuration file name.
const CONFIG_FILE: &str = "config.json";

/// Default config file location, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "regmirror", "regmirror")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Settings that may appear in the config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_registry: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_registry: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_max_mb: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_policy: Option<CachePolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_strategy: Option<PushStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Images `auto` may prefetch, in priority order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch_pool: Option<Vec<String>>,
}

impl FileConfig {
    /// Load `path`, or the default location when `None`.
    ///
    /// A missing default file is not an error; a missing explicit one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Overlay the values present in the file.
    pub fn apply(&self, config: &mut MirrorConfig) {
        if let Some(source) = &self.source_registry {
            config.source_registry = source.clone();
        }
        if let Some(target) = &self.target_registry {
            config.target_registry = target.clone();
        }
        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }
        if let Some(mib) = self.cache_max_mb {
            config.cache_max_bytes = mib.saturating_mul(1024 * 1024);
        }
        if let Some(policy) = self.cache_policy {
            config.cache_policy = policy;
        }
        if let Some(path) = &self.ledger_path {
            config.ledger_path = path.clone();
        }
        if let Some(strategy) = self.push_strategy {
            config.push_strategy = strategy;
        }
        if let Some(secs) = self.timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(pool) = &self.prefetch_pool {
            config.prefetch_pool = pool.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_and_apply() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "target_registry": "mirror.internal:5000",
                "parallelism": 6,
                "cache_max_mb": 2048,
                "cache_policy": "FIFO",
                "push_strategy": "upload",
                "prefetch_pool": ["myorg/api:v2", "redis:7"]
            }"#,
        )
        .unwrap();

        let file = FileConfig::load(Some(&path)).unwrap();
        let mut config = MirrorConfig::default();
        file.apply(&mut config);

        assert_eq!(config.target_registry, "mirror.internal:5000");
        assert_eq!(config.parallelism, 6);
        assert_eq!(config.cache_max_bytes, 2048 * 1024 * 1024);
        assert_eq!(config.cache_policy, CachePolicy::Fifo);
        assert_eq!(config.push_strategy, PushStrategy::Upload);
        assert_eq!(config.prefetch_pool, vec!["myorg/api:v2", "redis:7"]);
        assert_eq!(
            config.source_registry,
            MirrorConfig::default().source_registry
        );
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(FileConfig::load(Some(&dir.path().join("absent.json"))).is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "paralelism": 4 }"#).unwrap();
        assert!(FileConfig::load(Some(&path)).is_err());
    }
}
