//! Durable command metadata cache.
//!
//! One JSON file in the user cache directory maps command name to its
//! display metadata plus the entry file's path, mtime and size at the time
//! it was read. An entry is trusted only while the live file still has the
//! recorded mtime and size; a version mismatch drops the whole file.
//!
//! mtime + size is a cheap validity proxy. It is acceptable here because a
//! false hit can only produce a stale help string: definitions used for
//! execution are always read from the entry file itself.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};

use crate::schema::CommandMeta;
use crate::stat::{FileStat, stat_file};

/// Bumped whenever the persisted layout or the meaning of its fields changes.
pub const CACHE_VERSION: &str = "1";

const CACHE_DIR: &str = "cmdtree";
const CACHE_FILE: &str = "metadata-cache.json";
const DEFAULT_VALIDATION_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub metadata: CommandMeta,
    pub file_path: PathBuf,
    pub mtime: u64,
    pub size: u64,
}

impl CacheEntry {
    pub fn matches(&self, stat: &FileStat) -> bool {
        self.mtime == stat.mtime && self.size == stat.size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheData {
    pub version: String,
    pub entries: BTreeMap<String, CacheEntry>,
}

pub struct MetadataCache {
    path: PathBuf,
    ttl: Option<Duration>,
    concurrency: usize,
}

impl MetadataCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ttl: None,
            concurrency: DEFAULT_VALIDATION_CONCURRENCY,
        }
    }

    /// Cache file under the platform user cache directory
    /// (e.g. `~/.cache/cmdtree/metadata-cache.json`).
    pub fn in_user_cache_dir() -> Option<Self> {
        dirs::cache_dir().map(|dir| Self::new(dir.join(CACHE_DIR).join(CACHE_FILE)))
    }

    /// Distrust the whole file once it is older than `ttl`.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata of every entry that is still valid, or `None` when nothing
    /// in the cache can be trusted.
    pub async fn load(&self) -> Option<HashMap<String, CommandMeta>> {
        self.load_data().await.map(|data| {
            data.entries
                .into_iter()
                .map(|(name, entry)| (name, entry.metadata))
                .collect()
        })
    }

    /// Like [`load`](Self::load) but keeps the full entries and version tag.
    pub async fn load_data(&self) -> Option<CacheData> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!("metadata cache unavailable at {}: {}", self.path.display(), err);
                return None;
            }
        };

        if self.expired().await {
            tracing::debug!("metadata cache at {} expired", self.path.display());
            return None;
        }

        let data: CacheData = match serde_json::from_str(&content) {
            Ok(data) => data,
            Err(err) => {
                tracing::debug!("ignoring corrupt metadata cache: {}", err);
                return None;
            }
        };

        if data.version != CACHE_VERSION {
            tracing::debug!(
                "metadata cache version {} does not match {}, ignoring",
                data.version,
                CACHE_VERSION
            );
            return None;
        }

        let total = data.entries.len();
        let entries: BTreeMap<String, CacheEntry> = stream::iter(data.entries)
            .map(|(name, entry)| async move {
                match stat_file(&entry.file_path).await {
                    Ok(stat) if entry.matches(&stat) => Some((name, entry)),
                    _ => None,
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|entry| async move { entry })
            .collect()
            .await;

        tracing::debug!("metadata cache: {}/{} entries still valid", entries.len(), total);
        if entries.is_empty() {
            return None;
        }

        Some(CacheData {
            version: data.version,
            entries,
        })
    }

    async fn expired(&self) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        let modified = match tokio::fs::metadata(&self.path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return true,
        };
        // A timestamp in the future counts as fresh.
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= ttl)
            .unwrap_or(false)
    }

    /// Overwrite the persisted entry set. Only commands present in all three
    /// maps are written.
    pub async fn save(
        &self,
        metadata: &HashMap<String, CommandMeta>,
        stats: &HashMap<PathBuf, FileStat>,
        paths: &HashMap<String, PathBuf>,
    ) -> io::Result<()> {
        let entries = metadata
            .iter()
            .filter_map(|(name, meta)| {
                let path = paths.get(name)?;
                let stat = stats.get(path)?;
                Some((
                    name.clone(),
                    CacheEntry {
                        metadata: meta.clone(),
                        file_path: path.clone(),
                        mtime: stat.mtime,
                        size: stat.size,
                    },
                ))
            })
            .collect();

        self.write(&CacheData {
            version: CACHE_VERSION.to_string(),
            entries,
        })
        .await
    }

    /// Write `data` atomically (temp file + rename).
    pub async fn write(&self, data: &CacheData) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_string_pretty(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let tmp = self.path.with_extension(format!("json.{}.tmp", std::process::id()));
        tokio::fs::write(&tmp, json).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err);
        }
        tracing::debug!(
            "wrote {} metadata cache entries to {}",
            data.entries.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Remove the cache file. A missing file is not an error.
    pub async fn clear(&self) -> io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}
