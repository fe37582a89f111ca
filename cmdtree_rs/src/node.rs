//! Discovered command nodes and their two lazy loaders.
//!
//! Each node carries two independently memoized loaders: one for display
//! metadata, one for the full definition. Listing commands and rendering
//! global help only touch the first.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::LauncherError;
use crate::memo::SingleFlight;
use crate::module::ModuleLoader;
use crate::schema::{CommandDefinition, CommandMeta};

/// Full definitions, memoized per entry file path.
pub struct DefinitionCache {
    loader: Arc<dyn ModuleLoader>,
    flights: SingleFlight<PathBuf, Arc<CommandDefinition>>,
}

impl DefinitionCache {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            flights: SingleFlight::new(),
        }
    }

    pub async fn load(
        &self,
        command: &str,
        entry: &Path,
    ) -> Result<Arc<CommandDefinition>, LauncherError> {
        self.flights
            .get_or_try_init(entry.to_path_buf(), || async {
                tracing::debug!("loading definition of `{}` from {}", command, entry.display());
                self.loader
                    .load_definition(entry)
                    .await
                    .map(Arc::new)
                    .map_err(|source| LauncherError::load(command, source))
            })
            .await
    }

    pub fn loaded(&self) -> usize {
        self.flights.len()
    }
}

pub(crate) struct LazyMetadata {
    loader: Arc<dyn ModuleLoader>,
    cell: OnceCell<Arc<CommandMeta>>,
}

impl LazyMetadata {
    pub(crate) fn new(loader: Arc<dyn ModuleLoader>, cached: Option<CommandMeta>) -> Self {
        Self {
            loader,
            cell: OnceCell::new_with(cached.map(Arc::new)),
        }
    }
}

/// One command in the discovered hierarchy.
pub struct CommandNode {
    pub(crate) name: String,
    pub(crate) dir: PathBuf,
    pub(crate) entry: PathBuf,
    pub(crate) depth: usize,
    pub(crate) parent: Option<String>,
    pub(crate) children: BTreeSet<String>,
    pub(crate) metadata: LazyMetadata,
    pub(crate) definitions: Arc<DefinitionCache>,
}

impl CommandNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }

    /// Number of path segments between the commands root and this command's
    /// directory; root commands have depth 1.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> &BTreeSet<String> {
        &self.children
    }

    /// Metadata if it is already known (cache hit or earlier load).
    pub fn cached_metadata(&self) -> Option<Arc<CommandMeta>> {
        self.metadata.cell.get().cloned()
    }

    /// Display metadata, loaded at most once; concurrent callers share the load.
    pub async fn metadata(&self) -> Result<Arc<CommandMeta>, LauncherError> {
        self.metadata
            .cell
            .get_or_try_init(|| async {
                tracing::debug!("loading metadata of `{}` from {}", self.name, self.entry.display());
                self.metadata
                    .loader
                    .load_metadata(&self.entry)
                    .await
                    .map(Arc::new)
                    .map_err(|source| LauncherError::load(&self.name, source))
            })
            .await
            .cloned()
    }

    /// Handler, schema and metadata. Never needed for listing or global help.
    pub async fn definition(&self) -> Result<Arc<CommandDefinition>, LauncherError> {
        self.definitions.load(&self.name, &self.entry).await
    }
}

impl std::fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandNode")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("depth", &self.depth)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}
