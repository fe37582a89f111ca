//! argv -> command resolution -> parse -> handler.
//!
//! ```text
//! cmdt                         global help
//! cmdt --help | -h             global help
//! cmdt --version | -V          program version
//! cmdt build [flags]           single-level
//! cmdt deploy staging [flags]  two-level: deploy's flags go to deploy,
//!                              everything else to staging
//! ```

use std::sync::Arc;

use console::style;
use thiserror::Error;

use crate::discovery::{DEFAULT_METADATA_CONCURRENCY, Discovery};
use crate::error::LauncherError;
use crate::help::{CommandHelp, render_global_help};
use crate::parser::{parse_args, split_parent_flags};
use crate::registry::{Registry, RegistrySlot};
use crate::schema::{Invocation, ParentContext};

/// Called with every launcher error instead of printing it to stderr.
pub type ErrorHandler = Arc<dyn Fn(&LauncherError) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Name shown in help and `--version` output.
    pub program: String,
    pub version: String,
    pub metadata_concurrency: usize,
}

impl LaunchOptions {
    pub fn new(program: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            version: version.into(),
            metadata_concurrency: DEFAULT_METADATA_CONCURRENCY,
        }
    }
}

/// What a successful dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Help(String),
    Version(String),
    /// The handler of `command` ran to completion.
    Completed { command: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Launcher(#[from] LauncherError),
    /// Returned by a command handler; passed through unchanged.
    #[error(transparent)]
    Handler(anyhow::Error),
}

fn is_help(token: &str) -> bool {
    token == "--help" || token == "-h"
}

fn is_flag(token: &str) -> bool {
    token.starts_with('-')
}

pub struct Launcher {
    discovery: Discovery,
    slot: RegistrySlot,
    options: LaunchOptions,
    error_handler: Option<ErrorHandler>,
}

impl Launcher {
    pub fn new(discovery: Discovery, options: LaunchOptions) -> Self {
        Self {
            discovery,
            slot: RegistrySlot::new(),
            options,
            error_handler: None,
        }
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn slot(&self) -> &RegistrySlot {
        &self.slot
    }

    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    /// The registry, discovered on first use.
    pub async fn registry(&self) -> Result<Arc<Registry>, LauncherError> {
        self.slot.get_or_discover(&self.discovery).await
    }

    /// Wait for background cache persistence of the current registry.
    pub async fn settle(&self) {
        if let Some(registry) = self.slot.current().await {
            registry.settle().await;
        }
    }

    /// Route `argv` (without the program name) to a command handler.
    pub async fn dispatch<S: AsRef<str>>(
        &self,
        argv: &[S],
    ) -> Result<DispatchOutcome, DispatchError> {
        let argv: Vec<&str> = argv.iter().map(AsRef::as_ref).collect();

        let Some(&first) = argv.first() else {
            return Ok(DispatchOutcome::Help(self.global_help().await?));
        };
        if is_help(first) {
            return Ok(DispatchOutcome::Help(self.global_help().await?));
        }
        if first == "--version" || first == "-V" {
            return Ok(DispatchOutcome::Version(format!(
                "{} {}",
                self.options.program, self.options.version
            )));
        }

        let registry = self.registry().await?;
        self.ensure_known(&registry, first).await;

        match argv.get(1).copied().filter(|token| !is_flag(token)) {
            Some(second) => {
                self.ensure_known(&registry, second).await;
                self.dispatch_nested(&registry, first, second, &argv[2..]).await
            }
            None => self.dispatch_single(&registry, first, &argv[1..]).await,
        }
    }

    async fn ensure_known(&self, registry: &Registry, token: &str) {
        if !registry.is_known(token) {
            registry
                .ensure_aliases(self.options.metadata_concurrency)
                .await;
        }
    }

    async fn global_help(&self) -> Result<String, LauncherError> {
        let registry = self.registry().await?;
        Ok(render_global_help(
            &registry,
            &self.options.program,
            &self.options.version,
            self.options.metadata_concurrency,
        )
        .await)
    }

    async fn dispatch_single(
        &self,
        registry: &Registry,
        token: &str,
        rest: &[&str],
    ) -> Result<DispatchOutcome, DispatchError> {
        let chain = registry.resolve_command_chain(&[token])?;
        let node = &chain[0];
        let definition = node.definition().await?;

        if rest.iter().any(|token| is_help(token)) {
            let help = CommandHelp::collect(registry, &self.options.program, &chain, &definition, None)
                .await
                .render();
            return Ok(DispatchOutcome::Help(help));
        }

        let args = parse_args(rest, &definition.args)?;
        tracing::debug!("running `{}`", node.name());
        (definition.handler)(Invocation {
            command: node.name().to_string(),
            args,
            parent: None,
        })
        .await
        .map_err(DispatchError::Handler)?;

        Ok(DispatchOutcome::Completed {
            command: node.name().to_string(),
        })
    }

    async fn dispatch_nested(
        &self,
        registry: &Registry,
        parent_token: &str,
        child_token: &str,
        rest: &[&str],
    ) -> Result<DispatchOutcome, DispatchError> {
        let chain = registry.resolve_command_chain(&[parent_token, child_token])?;
        let (parent, child) = (&chain[0], &chain[1]);
        let (parent_definition, child_definition) =
            futures::try_join!(parent.definition(), child.definition())?;

        if rest.iter().any(|token| is_help(token)) {
            let help = CommandHelp::collect(
                registry,
                &self.options.program,
                &chain,
                &child_definition,
                Some(&*parent_definition),
            )
            .await
            .render();
            return Ok(DispatchOutcome::Help(help));
        }

        let split = split_parent_flags(rest, &parent_definition.args, &child_definition.args);
        let parent_args = if split.parent.is_empty() {
            None
        } else {
            Some(parse_args(&split.parent, &parent_definition.args)?)
        };
        let args = parse_args(&split.child, &child_definition.args)?;

        tracing::debug!("running `{} {}`", parent.name(), child.name());
        (child_definition.handler)(Invocation {
            command: child.name().to_string(),
            args,
            parent: Some(ParentContext {
                name: parent.name().to_string(),
                args: parent_args,
            }),
        })
        .await
        .map_err(DispatchError::Handler)?;

        Ok(DispatchOutcome::Completed {
            command: child.name().to_string(),
        })
    }

    /// Dispatch and map the outcome to an exit code. Help and version text
    /// go to stdout; launcher errors go to the error handler (or stderr) and
    /// yield 1. Handler errors are returned as-is.
    pub async fn run<S: AsRef<str>>(&self, argv: &[S]) -> anyhow::Result<i32> {
        match self.dispatch(argv).await {
            Ok(DispatchOutcome::Help(text)) => {
                print!("{}", text);
                Ok(0)
            }
            Ok(DispatchOutcome::Version(text)) => {
                println!("{}", text);
                Ok(0)
            }
            Ok(DispatchOutcome::Completed { .. }) => Ok(0),
            Err(DispatchError::Launcher(err)) => {
                self.report(&err);
                Ok(1)
            }
            Err(DispatchError::Handler(err)) => Err(err),
        }
    }

    fn report(&self, err: &LauncherError) {
        match &self.error_handler {
            Some(handler) => handler(err),
            None => eprintln!(
                "{} {}",
                style(format!("error[{}]:", err.code())).for_stderr().red().bold(),
                err
            ),
        }
    }
}
