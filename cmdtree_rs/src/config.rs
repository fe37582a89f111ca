//! Configuration file support for cmdtree.
//!
//! Loads optional `cmdtree.toml` from the base directory, then applies
//! `CMDT_*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::MetadataCache;
use crate::discovery::{DEFAULT_METADATA_CONCURRENCY, DEFAULT_STAT_CONCURRENCY, DiscoveryOptions};

pub const CONFIG_FILE: &str = "cmdtree.toml";

pub const ENV_COMMANDS_DIR: &str = "CMDT_COMMANDS_DIR";
pub const ENV_CACHE_PATH: &str = "CMDT_CACHE_PATH";
pub const ENV_NO_CACHE: &str = "CMDT_NO_CACHE";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CmdtreeConfig {
    /// Commands root, relative to the base directory unless absolute.
    pub commands_dir: PathBuf,
    pub cache: CacheConfig,
    pub concurrency: ConcurrencyConfig,
}

impl Default for CmdtreeConfig {
    fn default() -> Self {
        Self {
            commands_dir: PathBuf::from("commands"),
            cache: CacheConfig::default(),
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Cache file; defaults to the user cache directory.
    pub path: Option<PathBuf>,
    /// Distrust the cache file once it is older than this.
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub stat: usize,
    pub metadata: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            stat: DEFAULT_STAT_CONCURRENCY,
            metadata: DEFAULT_METADATA_CONCURRENCY,
        }
    }
}

impl CmdtreeConfig {
    /// Load `cmdtree.toml` from `base_dir` and apply environment overrides.
    pub fn load(base_dir: &Path) -> Self {
        let mut config = Self::load_from_path(&base_dir.join(CONFIG_FILE));
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Load config from a specific path.
    /// Returns default config if the file doesn't exist or is invalid.
    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Apply `CMDT_*` overrides looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str| var(key).filter(|value| !value.is_empty());

        if let Some(dir) = set(ENV_COMMANDS_DIR) {
            self.commands_dir = PathBuf::from(dir);
        }
        if let Some(path) = set(ENV_CACHE_PATH) {
            self.cache.path = Some(PathBuf::from(path));
        }
        if set(ENV_NO_CACHE).is_some() {
            self.cache.enabled = false;
        }
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            stat_concurrency: self.concurrency.stat.max(1),
            metadata_concurrency: self.concurrency.metadata.max(1),
        }
    }

    /// The metadata cache this config asks for, or `None` when caching is
    /// disabled or no cache location can be determined.
    pub fn metadata_cache(&self) -> Option<MetadataCache> {
        if !self.cache.enabled {
            return None;
        }
        let cache = match &self.cache.path {
            Some(path) => MetadataCache::new(path),
            None => MetadataCache::in_user_cache_dir()?,
        };
        let cache = cache.with_concurrency(self.concurrency.stat.max(1));
        Some(match self.cache.ttl_secs {
            Some(secs) => cache.with_ttl(Duration::from_secs(secs)),
            None => cache,
        })
    }
}
