//! # cmdtree
//!
//! **Hierarchical command launcher core** - discovers commands from a
//! directory tree, caches their display metadata across runs and dispatches
//! argv to the right handler with schema-validated flags.
//!
//! ## Layout convention
//!
//! ```text
//! commands/
//! ├── build/command.toml
//! └── deploy/command.toml
//!     └── staging/command.toml
//! ```
//!
//! Each `command.toml` declares display metadata, a flag schema and the name
//! of a handler registered by the host through [`Bindings`].
//!
//! ## Library usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cmdtree::{Bindings, Discovery, LaunchOptions, Launcher, TomlModuleLoader, handler};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let bindings = Bindings::new().with_handler(
//!     "deploy",
//!     handler(|invocation| async move {
//!         println!("deploying to {:?}", invocation.args.get_str("region"));
//!         Ok(())
//!     }),
//! );
//! let discovery = Discovery::new("commands", ".", Arc::new(TomlModuleLoader::new(bindings)));
//! let launcher = Launcher::new(discovery, LaunchOptions::new("mycli", "1.0.0"));
//!
//! let argv: Vec<String> = std::env::args().skip(1).collect();
//! let code = launcher.run(&argv).await?;
//! launcher.settle().await;
//! std::process::exit(code);
//! # }
//! ```

pub mod builtins;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod help;
pub mod memo;
pub mod module;
pub mod node;
pub mod parser;
pub mod registry;
pub mod schema;
pub mod stat;
pub mod suggest;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheData, CacheEntry, MetadataCache};
pub use config::CmdtreeConfig;
pub use discovery::{Discovery, DiscoveryOptions};
pub use dispatch::{DispatchError, DispatchOutcome, ErrorHandler, LaunchOptions, Launcher};
pub use error::{ErrorCode, LauncherError, ModuleError};
pub use module::{Bindings, ModuleLoader, TomlModuleLoader};
pub use node::CommandNode;
pub use parser::{FlagSplit, ParsedArgs, parse_args, split_parent_flags};
pub use registry::{Registry, RegistrySlot};
pub use schema::{
    ArgDefinition, ArgSchema, ArgType, ArgValue, CommandDefinition, CommandMeta, Handler,
    Invocation, ParentContext, Validator, handler, validator,
};
