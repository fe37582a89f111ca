//! Convention-based command discovery.
//!
//! Scans a commands root for entry files, derives the n-level hierarchy
//! from the directory layout and wires two lazy loaders per command.
//! Cached metadata is reused when the entry file's mtime and size still
//! match; a refreshed cache is persisted in the background afterwards.
//!
//! ```text
//! commands/
//! ├── build/command.toml            build    depth 1
//! └── deploy/command.toml           deploy   depth 1
//!     ├── staging/command.toml      staging  depth 2, parent deploy
//!     └── production/command.toml   production
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use globset::{Glob, GlobMatcher};
use walkdir::WalkDir;

use crate::cache::{CacheData, MetadataCache};
use crate::error::LauncherError;
use crate::module::{ENTRY_FILE, ModuleLoader, command_name_from_entry};
use crate::node::{CommandNode, DefinitionCache, LazyMetadata};
use crate::registry::Registry;
use crate::schema::CommandMeta;
use crate::stat::{FileStat, StatCache};

pub const DEFAULT_STAT_CONCURRENCY: usize = 10;
pub const DEFAULT_METADATA_CONCURRENCY: usize = 5;

/// Fan-out limits for filesystem work during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub stat_concurrency: usize,
    pub metadata_concurrency: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            stat_concurrency: DEFAULT_STAT_CONCURRENCY,
            metadata_concurrency: DEFAULT_METADATA_CONCURRENCY,
        }
    }
}

/// An entry file found under the commands root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundCommand {
    pub name: String,
    pub dir: PathBuf,
    pub entry: PathBuf,
    pub depth: usize,
    pub parent: Option<String>,
}

pub struct Discovery {
    root: PathBuf,
    loader: Arc<dyn ModuleLoader>,
    cache: Option<Arc<MetadataCache>>,
    options: DiscoveryOptions,
}

impl Discovery {
    /// `commands_root` is resolved against `base_dir` when relative.
    pub fn new(
        commands_root: impl AsRef<Path>,
        base_dir: impl AsRef<Path>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        let root = commands_root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            base_dir.as_ref().join(root)
        };
        Self {
            root,
            loader,
            cache: None,
            options: DiscoveryOptions::default(),
        }
    }

    pub fn with_cache(mut self, cache: MetadataCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn with_options(mut self, options: DiscoveryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> DiscoveryOptions {
        self.options
    }

    pub fn cache(&self) -> Option<&MetadataCache> {
        self.cache.as_deref()
    }

    /// Run one discovery pass.
    ///
    /// Only an unreadable commands root fails; broken command modules are
    /// registered and report their error when first loaded.
    pub async fn discover(&self) -> Result<Registry, LauncherError> {
        let found = scan_entry_files(&self.root)?;
        tracing::debug!("found {} command entry files under {}", found.len(), self.root.display());

        let stat_cache = StatCache::new();
        let entries: Vec<PathBuf> = found.iter().map(|f| f.entry.clone()).collect();
        let stats = stat_cache
            .stat_all(&entries, self.options.stat_concurrency)
            .await;

        let cached = match &self.cache {
            Some(cache) => cache.load_data().await,
            None => None,
        };
        let cached_count = cached.as_ref().map_or(0, |data| data.entries.len());

        let definitions = Arc::new(DefinitionCache::new(Arc::clone(&self.loader)));
        let mut nodes: BTreeMap<String, CommandNode> = BTreeMap::new();
        let mut hits = 0usize;

        for command in found {
            if let Some(existing) = nodes.get(&command.name) {
                tracing::warn!(
                    "duplicate command name `{}` at {} (already registered from {}), skipping",
                    command.name,
                    command.dir.display(),
                    existing.dir.display()
                );
                continue;
            }

            let reused = reusable_metadata(cached.as_ref(), &command, stats.get(&command.entry));
            if reused.is_some() {
                hits += 1;
            }

            nodes.insert(
                command.name.clone(),
                CommandNode {
                    metadata: LazyMetadata::new(Arc::clone(&self.loader), reused),
                    definitions: Arc::clone(&definitions),
                    name: command.name,
                    dir: command.dir,
                    entry: command.entry,
                    depth: command.depth,
                    parent: command.parent,
                    children: BTreeSet::new(),
                },
            );
        }

        link_children(&mut nodes);

        let total = nodes.len();
        tracing::debug!("metadata cache hits: {}/{}", hits, total);

        let nodes: BTreeMap<String, Arc<CommandNode>> = nodes
            .into_iter()
            .map(|(name, node)| (name, Arc::new(node)))
            .collect();
        let registry = Registry::new(nodes, definitions);

        let stale = hits < total || cached_count != hits;
        if let Some(cache) = self.cache.as_ref().filter(|_| stale) {
            self.spawn_persist(&registry, Arc::clone(cache), stats);
        }

        Ok(registry)
    }

    /// Fire-and-forget: resolve missing metadata and rewrite the cache.
    fn spawn_persist(
        &self,
        registry: &Registry,
        cache: Arc<MetadataCache>,
        stats: HashMap<PathBuf, FileStat>,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime, skipping metadata cache refresh");
            return;
        };
        let nodes: Vec<Arc<CommandNode>> = registry.nodes().cloned().collect();
        let concurrency = self.options.metadata_concurrency.max(1);

        let handle = runtime.spawn(async move {
            let loaded: Vec<(String, PathBuf, CommandMeta)> = stream::iter(nodes)
                .map(|node| async move {
                    match node.metadata().await {
                        Ok(meta) => Some((node.name.clone(), node.entry.clone(), (*meta).clone())),
                        Err(err) => {
                            tracing::debug!("not caching `{}`: {}", node.name, err);
                            None
                        }
                    }
                })
                .buffer_unordered(concurrency)
                .filter_map(|loaded| async move { loaded })
                .collect()
                .await;

            let mut metadata = HashMap::new();
            let mut paths = HashMap::new();
            for (name, entry, meta) in loaded {
                paths.insert(name.clone(), entry);
                metadata.insert(name, meta);
            }

            if let Err(err) = cache.save(&metadata, &stats, &paths).await {
                tracing::debug!("metadata cache write failed: {}", err);
            }
        });
        registry.attach_persist(handle);
    }
}

fn reusable_metadata(
    cached: Option<&CacheData>,
    command: &FoundCommand,
    stat: Option<&FileStat>,
) -> Option<CommandMeta> {
    let entry = cached?.entries.get(&command.name)?;
    let stat = stat?;
    (entry.file_path == command.entry && entry.matches(stat)).then(|| entry.metadata.clone())
}

/// Record each node in its parent's children. A node whose parent name is
/// registered from a different directory keeps its recorded parent but is
/// not linked, so a child's parent always equals its actual ancestor.
fn link_children(nodes: &mut BTreeMap<String, CommandNode>) {
    let links: Vec<(String, String)> = nodes
        .values()
        .filter_map(|node| {
            let parent = node.parent.as_ref()?;
            let parent_node = nodes.get(parent)?;
            if node.dir.parent() == Some(parent_node.dir.as_path()) {
                Some((parent.clone(), node.name.clone()))
            } else {
                tracing::warn!("{}", parent_mismatch(node, parent_node));
                None
            }
        })
        .collect();

    for (parent, child) in links {
        if let Some(parent) = nodes.get_mut(&parent) {
            parent.children.insert(child);
        }
    }
}

fn parent_mismatch(child: &CommandNode, parent: &CommandNode) -> String {
    format!(
        "not linking `{}` ({}) as a subcommand: `{}` is registered from {}",
        child.name,
        child.dir.display(),
        parent.name,
        parent.dir.display()
    )
}

fn entry_matcher() -> Result<GlobMatcher, globset::Error> {
    Ok(Glob::new(&format!("**/{}", ENTRY_FILE))?.compile_matcher())
}

/// Find every entry file under `root`, shallowest first, then by path.
pub fn scan_entry_files(root: &Path) -> Result<Vec<FoundCommand>, LauncherError> {
    let failed = |message: String| LauncherError::DiscoveryFailed {
        root: root.to_path_buf(),
        message,
    };

    if !root.is_dir() {
        return Err(failed("not a directory".to_string()));
    }
    let matcher = entry_matcher().map_err(|e| failed(e.to_string()))?;

    let mut found = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(2)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if !matcher.is_match(relative) {
            continue;
        }
        let Some(name) = command_name_from_entry(path) else {
            continue;
        };
        let Some(dir) = path.parent() else {
            continue;
        };

        // Segments of the command directory relative to the root.
        let segments: Vec<String> = relative
            .parent()
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        let depth = segments.len();
        let parent = if depth > 1 {
            segments.get(depth - 2).cloned()
        } else {
            None
        };

        found.push(FoundCommand {
            name,
            dir: dir.to_path_buf(),
            entry: path.to_path_buf(),
            depth,
            parent,
        });
    }

    found.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.entry.cmp(&b.entry)));
    Ok(found)
}
