//! File stat probing used as the cache-validity proxy.
//!
//! `mtime` + `size` decide whether cached display metadata is still
//! trusted. Within one discovery pass every path is stat'ed at most once.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};

use crate::memo::SingleFlight;

/// Modification time (milliseconds since the Unix epoch) and size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileStat {
    pub mtime: u64,
    pub size: u64,
}

impl FileStat {
    pub fn from_metadata(metadata: &std::fs::Metadata) -> io::Result<Self> {
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok(Self {
            mtime,
            size: metadata.len(),
        })
    }
}

/// Stat a single file without memoization.
pub async fn stat_file(path: &Path) -> io::Result<FileStat> {
    let metadata = tokio::fs::metadata(path).await?;
    FileStat::from_metadata(&metadata)
}

/// Same-pass stat memo. Concurrent requests for one path share a syscall.
#[derive(Default)]
pub struct StatCache {
    flights: SingleFlight<PathBuf, FileStat>,
}

impl StatCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stat(&self, path: &Path) -> io::Result<FileStat> {
        self.flights
            .get_or_try_init(path.to_path_buf(), || stat_file(path))
            .await
    }

    /// Stat every path with at most `concurrency` probes in flight.
    /// Paths that cannot be stat'ed are left out of the result.
    pub async fn stat_all(
        &self,
        paths: &[PathBuf],
        concurrency: usize,
    ) -> HashMap<PathBuf, FileStat> {
        self.stat_all_with(paths, concurrency, |path| async move { stat_file(&path).await })
            .await
    }

    async fn stat_all_with<F, Fut>(
        &self,
        paths: &[PathBuf],
        concurrency: usize,
        probe: F,
    ) -> HashMap<PathBuf, FileStat>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = io::Result<FileStat>>,
    {
        let probe = &probe;
        stream::iter(paths)
            .map(|path| async move {
                let result = self
                    .flights
                    .get_or_try_init(path.clone(), || probe(path.clone()))
                    .await;
                (path, result)
            })
            .buffer_unordered(concurrency.max(1))
            .filter_map(|(path, result)| async move {
                match result {
                    Ok(stat) => Some((path.clone(), stat)),
                    Err(err) => {
                        tracing::debug!("stat failed for {}: {}", path.display(), err);
                        None
                    }
                }
            })
            .collect()
            .await
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}
