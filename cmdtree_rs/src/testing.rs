//! Shared fixtures for unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tempfile::TempDir;

use crate::error::ModuleError;
use crate::module::{Bindings, ENTRY_FILE, ModuleLoader, TomlModuleLoader};
use crate::schema::{CommandDefinition, CommandMeta, Invocation, handler};

/// Invocations seen by recording handlers.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    calls: Arc<Mutex<Vec<Invocation>>>,
}

impl Recorder {
    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().expect("recorder lock").clone()
    }

    /// Bindings with a recording handler per name, plus a `fail` handler.
    pub(crate) fn bindings(&self, names: &[&str]) -> Bindings {
        let mut bindings = Bindings::new().with_handler(
            "fail",
            handler(|_| async { Err(anyhow::anyhow!("handler exploded")) }),
        );
        for name in names {
            let calls = Arc::clone(&self.calls);
            bindings = bindings.with_handler(
                *name,
                handler(move |invocation| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.lock().expect("recorder lock").push(invocation);
                        Ok(())
                    }
                }),
            );
        }
        bindings
    }
}

/// TOML loader that counts how often each loader ran and how many metadata
/// loads were in flight at once.
pub(crate) struct CountingLoader {
    inner: TomlModuleLoader,
    metadata: AtomicUsize,
    definitions: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingLoader {
    pub(crate) fn shared() -> Arc<Self> {
        Self::with_bindings(Recorder::default().bindings(&DEPLOY_TREE_HANDLERS))
    }

    pub(crate) fn with_bindings(bindings: Bindings) -> Arc<Self> {
        Arc::new(Self::new(bindings, None))
    }

    /// Every metadata load sleeps for `delay` so overlapping loads show up
    /// in [`CountingLoader::peak_metadata_loads`].
    pub(crate) fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self::new(
            Recorder::default().bindings(&DEPLOY_TREE_HANDLERS),
            Some(delay),
        ))
    }

    fn new(bindings: Bindings, delay: Option<Duration>) -> Self {
        Self {
            inner: TomlModuleLoader::new(bindings),
            metadata: AtomicUsize::new(0),
            definitions: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
        }
    }

    pub(crate) fn peak_metadata_loads(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn metadata_loads(&self) -> usize {
        self.metadata.load(Ordering::SeqCst)
    }

    pub(crate) fn definition_loads(&self) -> usize {
        self.definitions.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for CountingLoader {
    fn load_metadata<'a>(&'a self, entry: &'a Path) -> BoxFuture<'a, Result<CommandMeta, ModuleError>> {
        self.metadata.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let result = self.inner.load_metadata(entry).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn load_definition<'a>(
        &'a self,
        entry: &'a Path,
    ) -> BoxFuture<'a, Result<CommandDefinition, ModuleError>> {
        self.definitions.fetch_add(1, Ordering::SeqCst);
        self.inner.load_definition(entry)
    }
}

/// `<temp>/commands/<rel>/command.toml` for every `(rel, body)`.
pub(crate) fn command_tree(commands: &[(&str, &str)]) -> TempDir {
    let temp = TempDir::new().expect("temp dir");
    for (rel, body) in commands {
        let dir = temp.path().join("commands").join(rel);
        std::fs::create_dir_all(&dir).expect("create command dir");
        std::fs::write(dir.join(ENTRY_FILE), body).expect("write entry");
    }
    temp
}

pub(crate) const DEPLOY_TREE_HANDLERS: [&str; 4] = ["build", "deploy", "staging", "production"];

const BUILD: &str = r#"
[meta]
name = "build"
description = "Build the project"
aliases = ["b"]
examples = ["build --target release"]

[args.verbose]
type = "boolean"
aliases = ["v"]
description = "Print every step"

[args.target]
type = "string"
default = "debug"
allowed = ["debug", "release"]
"#;

const DEPLOY: &str = r#"
[meta]
name = "deploy"
description = "Deploy the application"
aliases = ["d"]
version = "2.1.0"

[args.verbose]
type = "boolean"
aliases = ["v"]

[args.region]
type = "string"
default = "us-east"
"#;

const STAGING: &str = r#"
[meta]
name = "staging"
description = "Deploy to staging"

[args.branch]
type = "string"
default = "main"

[args.force]
type = "boolean"
"#;

const PRODUCTION: &str = r#"
[meta]
name = "production"
description = "Deploy to production"
aliases = ["prod"]

[args.confirm]
type = "boolean"
required = true
"#;

/// `count` top-level commands named `cmd00`, `cmd01`, ...
pub(crate) fn wide_tree(count: usize) -> TempDir {
    let commands: Vec<(String, String)> = (0..count)
        .map(|i| {
            let name = format!("cmd{:02}", i);
            let body = format!("[meta]\nname = \"{}\"\ndescription = \"Command {}\"\n", name, i);
            (name, body)
        })
        .collect();
    let refs: Vec<(&str, &str)> = commands
        .iter()
        .map(|(name, body)| (name.as_str(), body.as_str()))
        .collect();
    command_tree(&refs)
}

/// `build`, `deploy` and deploy's `staging` and `production` children.
pub(crate) fn deploy_tree() -> TempDir {
    command_tree(&[
        ("build", BUILD),
        ("deploy", DEPLOY),
        ("deploy/staging", STAGING),
        ("deploy/production", PRODUCTION),
    ])
}
