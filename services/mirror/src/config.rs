//! Configuration for the mirror.

use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use regmirror_registry::{registry_url, PushStrategy, RegistryConfig, ResolutionError};

use crate::capacity::{CacheBudget, CachePolicy};
use crate::error::ConfigurationError;
use crate::predictor::StaticPool;

/// Source registry used when none is configured.
pub const DEFAULT_SOURCE_REGISTRY: &str = "https://registry-1.docker.io";
/// Target registry used when none is configured.
pub const DEFAULT_TARGET_REGISTRY: &str = "localhost:5000";
/// Concurrent layer transfers per sync.
pub const DEFAULT_PARALLELISM: usize = 3;
/// Cache budget in MiB.
pub const DEFAULT_CACHE_MAX_MIB: u64 = 10_000;
/// Ledger records scanned when planning eviction.
pub const DEFAULT_SCAN_LIMIT: usize = 1000;

const LEDGER_FILE_NAME: &str = ".registry-mirror.db";
const MIB: u64 = 1024 * 1024;

/// Mirror configuration.
///
/// Values are handed to component constructors explicitly; nothing reads the
/// environment after [`MirrorConfig::from_env`] returns.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorConfig {
    /// Registry images are pulled from. `https://` is assumed without a scheme.
    pub source_registry: String,

    /// Registry layers are pushed to. `http://` is assumed without a scheme.
    pub target_registry: String,

    /// Maximum concurrent layer transfers.
    pub parallelism: usize,

    /// Cache budget in bytes.
    pub cache_max_bytes: u64,

    /// Eviction ordering.
    pub cache_policy: CachePolicy,

    /// SQLite ledger location.
    pub ledger_path: PathBuf,

    /// How blobs are written to the target.
    pub push_strategy: PushStrategy,

    /// Timeout for manifest and metadata requests.
    pub request_timeout: Duration,

    /// Ledger records scanned by the capacity manager.
    pub scan_limit: usize,

    /// Images ranked by the prefetch predictor. Empty uses the popular list.
    pub prefetch_pool: Vec<String>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            source_registry: DEFAULT_SOURCE_REGISTRY.to_string(),
            target_registry: DEFAULT_TARGET_REGISTRY.to_string(),
            parallelism: DEFAULT_PARALLELISM,
            cache_max_bytes: DEFAULT_CACHE_MAX_MIB * MIB,
            cache_policy: CachePolicy::Lru,
            ledger_path: default_ledger_path(),
            push_strategy: PushStrategy::Direct,
            request_timeout: Duration::from_secs(300),
            scan_limit: DEFAULT_SCAN_LIMIT,
            prefetch_pool: Vec::new(),
        }
    }
}

/// `~/.registry-mirror.db`, or the working directory when no home is known.
pub fn default_ledger_path() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(LEDGER_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(LEDGER_FILE_NAME))
}

impl MirrorConfig {
    /// Defaults overlaid with `REGISTRY_MIRROR_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values found through `lookup`, then validate.
    ///
    /// Recognized keys:
    /// - `REGISTRY_MIRROR_SOURCE`
    /// - `REGISTRY_MIRROR_REGISTRY` (target)
    /// - `REGISTRY_MIRROR_PARALLEL`
    /// - `REGISTRY_MIRROR_CACHE_MAX_MB`
    /// - `REGISTRY_MIRROR_CACHE_POLICY`
    /// - `REGISTRY_MIRROR_DB`
    /// - `REGISTRY_MIRROR_PUSH_STRATEGY`
    /// - `REGISTRY_MIRROR_TIMEOUT_SECS`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(source) = lookup("REGISTRY_MIRROR_SOURCE") {
            self.source_registry = source;
        }
        if let Some(target) = lookup("REGISTRY_MIRROR_REGISTRY") {
            self.target_registry = target;
        }
        if let Some(value) = lookup("REGISTRY_MIRROR_PARALLEL") {
            self.parallelism = parse_value("REGISTRY_MIRROR_PARALLEL", &value)?;
        }
        if let Some(value) = lookup("REGISTRY_MIRROR_CACHE_MAX_MB") {
            let mib: u64 = parse_value("REGISTRY_MIRROR_CACHE_MAX_MB", &value)?;
            self.cache_max_bytes = mib.saturating_mul(MIB);
        }
        if let Some(value) = lookup("REGISTRY_MIRROR_CACHE_POLICY") {
            self.cache_policy = value.parse()?;
        }
        if let Some(path) = lookup("REGISTRY_MIRROR_DB") {
            self.ledger_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("REGISTRY_MIRROR_PUSH_STRATEGY") {
            self.push_strategy =
                value
                    .parse()
                    .map_err(|_| ConfigurationError::InvalidValue {
                        key: "REGISTRY_MIRROR_PUSH_STRATEGY".to_string(),
                        value: value.clone(),
                    })?;
        }
        if let Some(value) = lookup("REGISTRY_MIRROR_TIMEOUT_SECS") {
            let secs: u64 = parse_value("REGISTRY_MIRROR_TIMEOUT_SECS", &value)?;
            self.request_timeout = Duration::from_secs(secs);
        }

        self.validate()
    }

    /// Check values that constructors would otherwise reject later.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.parallelism == 0 {
            return Err(ConfigurationError::InvalidParallelism(self.parallelism));
        }
        if self.cache_max_bytes == 0 {
            return Err(ConfigurationError::InvalidBudget);
        }
        if self.source_registry.trim().is_empty() {
            return Err(ConfigurationError::InvalidValue {
                key: "source_registry".to_string(),
                value: self.source_registry.clone(),
            });
        }
        if self.target_registry.trim().is_empty() {
            return Err(ConfigurationError::InvalidValue {
                key: "target_registry".to_string(),
                value: self.target_registry.clone(),
            });
        }
        self.candidate_pool()?;
        Ok(())
    }

    /// Client configuration for the source registry.
    pub fn source_config(&self) -> RegistryConfig {
        RegistryConfig {
            base_url: registry_url(&self.source_registry, "https"),
            request_timeout: self.request_timeout,
            ..Default::default()
        }
    }

    /// Client configuration for the target registry.
    pub fn target_config(&self) -> RegistryConfig {
        RegistryConfig {
            base_url: registry_url(&self.target_registry, "http"),
            request_timeout: self.request_timeout,
            push_strategy: self.push_strategy,
            ..Default::default()
        }
    }

    /// The prefetch candidate pool.
    pub fn candidate_pool(&self) -> Result<StaticPool, ConfigurationError> {
        if self.prefetch_pool.is_empty() {
            return Ok(StaticPool::popular());
        }
        StaticPool::parse(&self.prefetch_pool).map_err(|err| {
            let value = match err {
                ResolutionError::InvalidReference { reference, .. } => reference,
                other => other.to_string(),
            };
            ConfigurationError::InvalidValue {
                key: "prefetch_pool".to_string(),
                value,
            }
        })
    }

    /// The configured cache budget.
    pub fn cache_budget(&self) -> Result<CacheBudget, ConfigurationError> {
        CacheBudget::new(self.cache_max_bytes, self.cache_policy)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigurationError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigurationError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
