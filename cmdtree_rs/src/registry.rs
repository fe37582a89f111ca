//! The discovered command registry and the context slot that owns it.
//!
//! A [`Registry`] is the output of one discovery pass: every command node,
//! the alias map and the root names. Resolution never fails on alias lookup
//! itself; errors only surface when a resolved name is not in the hierarchy.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use futures::StreamExt;
use futures::stream;
use tokio::task::JoinHandle;

use crate::discovery::Discovery;
use crate::error::LauncherError;
use crate::node::{CommandNode, DefinitionCache};
use crate::schema::CommandMeta;
use crate::suggest::suggest_similar;

pub struct Registry {
    nodes: BTreeMap<String, Arc<CommandNode>>,
    aliases: RwLock<HashMap<String, String>>,
    roots: BTreeSet<String>,
    definitions: Arc<DefinitionCache>,
    persist: Mutex<Option<JoinHandle<()>>>,
}

impl Registry {
    pub(crate) fn new(
        nodes: BTreeMap<String, Arc<CommandNode>>,
        definitions: Arc<DefinitionCache>,
    ) -> Self {
        let roots = nodes
            .values()
            .filter(|node| node.depth == 1)
            .map(|node| node.name.clone())
            .collect();
        let registry = Self {
            nodes,
            aliases: RwLock::new(HashMap::new()),
            roots,
            definitions,
            persist: Mutex::new(None),
        };
        let known: Vec<(String, Arc<CommandMeta>)> = registry
            .nodes
            .values()
            .filter_map(|node| node.cached_metadata().map(|meta| (node.name.clone(), meta)))
            .collect();
        for (name, meta) in known {
            registry.register_aliases(&name, &meta);
        }
        registry
    }

    /// Every command name, sorted.
    pub fn command_names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Names of depth-1 commands.
    pub fn root_names(&self) -> &BTreeSet<String> {
        &self.roots
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CommandNode>> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<CommandNode>> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn definitions(&self) -> &DefinitionCache {
        &self.definitions
    }

    /// Snapshot of the alias map (alias -> command name).
    pub fn aliases(&self) -> HashMap<String, String> {
        self.read_aliases().clone()
    }

    fn read_aliases(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.aliases.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind `alias` to `target` without checking that `target` exists.
    /// Dangling aliases are reported as not-found at resolution time.
    pub fn insert_alias(&self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(alias.into(), target.into());
    }

    fn register_aliases(&self, name: &str, meta: &CommandMeta) {
        let mut aliases = self
            .aliases
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for alias in &meta.aliases {
            if self.nodes.contains_key(alias) {
                tracing::warn!("alias `{}` of `{}` shadows a command name, ignoring", alias, name);
                continue;
            }
            match aliases.get(alias) {
                Some(existing) if existing != name => {
                    tracing::warn!(
                        "alias `{}` of `{}` already points at `{}`, ignoring",
                        alias,
                        name,
                        existing
                    );
                }
                _ => {
                    aliases.insert(alias.clone(), name.to_string());
                }
            }
        }
    }

    /// True if `token` is a command name or a registered alias.
    pub fn is_known(&self, token: &str) -> bool {
        self.nodes.contains_key(token) || self.read_aliases().contains_key(token)
    }

    /// Alias target if `name_or_alias` is a registered alias, else the input.
    pub fn resolve_command(&self, name_or_alias: &str) -> String {
        self.read_aliases()
            .get(name_or_alias)
            .cloned()
            .unwrap_or_else(|| name_or_alias.to_string())
    }

    /// Resolve a command chain level by level.
    ///
    /// The first token must name a known command; each later token must name
    /// a child of the previous one. Errors reference the token as typed and
    /// list the alternatives of the level that failed.
    pub fn resolve_command_chain<S: AsRef<str>>(
        &self,
        tokens: &[S],
    ) -> Result<Vec<Arc<CommandNode>>, LauncherError> {
        if tokens.is_empty() {
            return Err(self.not_found("", None));
        }

        let mut chain: Vec<Arc<CommandNode>> = Vec::with_capacity(tokens.len());
        for token in tokens {
            let token = token.as_ref();
            let resolved = self.resolve_command(token);
            let node = match chain.last() {
                None => self
                    .nodes
                    .get(&resolved)
                    .ok_or_else(|| self.not_found(token, None))?,
                Some(parent) => self
                    .nodes
                    .get(&resolved)
                    .filter(|node| node.parent() == Some(parent.name()))
                    .ok_or_else(|| self.not_found(token, Some(parent)))?,
            };
            chain.push(Arc::clone(node));
        }
        Ok(chain)
    }

    fn not_found(&self, token: &str, parent: Option<&Arc<CommandNode>>) -> LauncherError {
        let available: Vec<String> = match parent {
            Some(parent) => parent.children.iter().cloned().collect(),
            None => self.command_names(),
        };
        let suggestion = suggest_similar(token, available.iter().map(String::as_str));
        LauncherError::CommandNotFound {
            name: token.to_string(),
            parent: parent.map(|p| p.name.clone()),
            available,
            suggestion,
        }
    }

    /// Load metadata of every command with at most `concurrency` loads in flight.
    pub async fn load_all_metadata(
        &self,
        concurrency: usize,
    ) -> BTreeMap<String, Result<Arc<CommandMeta>, LauncherError>> {
        stream::iter(self.nodes.values())
            .map(|node| async move { (node.name.clone(), node.metadata().await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Make aliases of commands whose metadata was not cached resolvable.
    pub async fn ensure_aliases(&self, concurrency: usize) {
        for (name, meta) in self.load_all_metadata(concurrency).await {
            match meta {
                Ok(meta) => self.register_aliases(&name, &meta),
                Err(err) => tracing::debug!("skipping aliases of `{}`: {}", name, err),
            }
        }
    }

    pub(crate) fn attach_persist(&self, handle: JoinHandle<()>) {
        *self
            .persist
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
    }

    /// Wait for background cache persistence started by discovery, if any.
    /// Persistence failures are never reported.
    pub async fn settle(&self) {
        let handle = self
            .persist
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("roots", &self.roots)
            .field("aliases", &*self.read_aliases())
            .finish()
    }
}

/// Explicit owner of the process's registry: built on first use, replaceable,
/// and clearable to force rediscovery.
#[derive(Default)]
pub struct RegistrySlot {
    slot: tokio::sync::Mutex<Option<Arc<Registry>>>,
}

impl RegistrySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current registry, discovering one first if the slot is empty.
    /// Concurrent callers wait for a single discovery pass.
    pub async fn get_or_discover(&self, discovery: &Discovery) -> Result<Arc<Registry>, LauncherError> {
        let mut slot = self.slot.lock().await;
        if let Some(registry) = slot.as_ref() {
            return Ok(Arc::clone(registry));
        }
        let registry = Arc::new(discovery.discover().await?);
        *slot = Some(Arc::clone(&registry));
        Ok(registry)
    }

    pub async fn current(&self) -> Option<Arc<Registry>> {
        self.slot.lock().await.clone()
    }

    pub async fn set(&self, registry: Registry) -> Arc<Registry> {
        let registry = Arc::new(registry);
        *self.slot.lock().await = Some(Arc::clone(&registry));
        registry
    }

    pub async fn clear(&self) {
        *self.slot.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::testing::{CountingLoader, deploy_tree, wide_tree};
    use std::time::Duration;

    async fn discover(temp: &tempfile::TempDir) -> Registry {
        Discovery::new("commands", temp.path(), CountingLoader::shared())
            .discover()
            .await
            .expect("discover")
    }

    #[tokio::test]
    async fn test_resolve_command_passes_unknown_names_through() {
        let temp = deploy_tree();
        let registry = discover(&temp).await;
        assert_eq!(registry.resolve_command("whatever"), "whatever");
        assert_eq!(registry.resolve_command("d"), "d");

        registry.ensure_aliases(5).await;
        assert_eq!(registry.resolve_command("d"), "deploy");
        assert_eq!(registry.resolve_command("prod"), "production");
        assert!(registry.is_known("b"));
    }

    #[tokio::test]
    async fn test_load_all_metadata_bounds_loads_in_flight() {
        let temp = wide_tree(12);
        let loader = CountingLoader::slow(Duration::from_millis(10));
        let registry = Discovery::new("commands", temp.path(), loader.clone())
            .discover()
            .await
            .expect("discover");

        let metadata = registry.load_all_metadata(3).await;
        assert_eq!(metadata.len(), 12);
        assert!(metadata.values().all(Result::is_ok));
        assert_eq!(loader.metadata_loads(), 12);
        assert!(loader.peak_metadata_loads() <= 3, "peak {}", loader.peak_metadata_loads());
        assert!(loader.peak_metadata_loads() > 1);
    }

    #[tokio::test]
    async fn test_dangling_alias_is_not_found_for_typed_token() {
        let temp = deploy_tree();
        let registry = discover(&temp).await;
        registry.insert_alias("ghost", "nowhere");

        let err = registry.resolve_command_chain(&["ghost"]).expect_err("dangling");
        let LauncherError::CommandNotFound { name, available, .. } = &err else {
            panic!("expected not found, got {:?}", err);
        };
        assert_eq!(name, "ghost");
        assert_eq!(available, &registry.command_names());
    }

    #[tokio::test]
    async fn test_chain_requires_actual_parent() {
        let temp = deploy_tree();
        let registry = discover(&temp).await;

        let chain = registry
            .resolve_command_chain(&["deploy", "staging"])
            .expect("chain");
        assert_eq!(chain[1].parent(), Some(chain[0].name()));

        let err = registry
            .resolve_command_chain(&["build", "staging"])
            .expect_err("staging is not build's child");
        assert_eq!(err.code(), ErrorCode::CommandNotFound);
        assert!(err.to_string().contains("`build` has no subcommands"));

        let err = registry
            .resolve_command_chain(&["deploy", "staging", "extra"])
            .expect_err("third level");
        assert!(err.to_string().contains("unknown subcommand `extra` for `staging`"));
    }

    #[tokio::test]
    async fn test_alias_never_shadows_command_name() {
        let temp = crate::testing::command_tree(&[
            ("build", "[meta]\nname=\"build\"\ndescription=\"b\"\naliases=[\"deploy\"]\n[args]\n"),
            ("deploy", "[meta]\nname=\"deploy\"\ndescription=\"d\"\n[args]\n"),
        ]);
        let registry = discover(&temp).await;
        registry.ensure_aliases(5).await;
        assert!(registry.aliases().is_empty());
        assert_eq!(registry.resolve_command("deploy"), "deploy");
    }

    #[tokio::test]
    async fn test_concurrent_metadata_requests_load_once() {
        let temp = deploy_tree();
        let loader = CountingLoader::shared();
        let registry = Discovery::new("commands", temp.path(), loader.clone())
            .discover()
            .await
            .expect("discover");
        let node = registry.get("build").expect("build");

        let (a, b, c) = tokio::join!(node.metadata(), node.metadata(), node.metadata());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(loader.metadata_loads(), 1);

        let (x, y) = tokio::join!(node.definition(), node.definition());
        assert!(x.is_ok() && y.is_ok());
        assert_eq!(loader.definition_loads(), 1);
        assert_eq!(registry.definitions().loaded(), 1);
    }

    #[tokio::test]
    async fn test_slot_discovers_once_until_cleared() {
        let temp = deploy_tree();
        let discovery = Discovery::new("commands", temp.path(), CountingLoader::shared());
        let slot = RegistrySlot::new();
        assert!(slot.current().await.is_none());

        let first = slot.get_or_discover(&discovery).await.expect("discover");
        let again = slot.get_or_discover(&discovery).await.expect("discover");
        assert!(Arc::ptr_eq(&first, &again));

        slot.clear().await;
        assert!(slot.current().await.is_none());
        let fresh = slot.get_or_discover(&discovery).await.expect("discover");
        assert!(!Arc::ptr_eq(&first, &fresh));

        let replaced = slot.set(discovery.discover().await.expect("discover")).await;
        let current = slot.current().await.expect("current");
        assert!(Arc::ptr_eq(&replaced, &current));
    }
}
