//! Loading command modules from entry files.
//!
//! Every command directory holds one [`ENTRY_FILE`]. The [`ModuleLoader`]
//! trait is the seam between the launcher core and whatever turns such a
//! file into metadata or a full definition; [`TomlModuleLoader`] is the
//! default implementation, binding handler and validator names declared in
//! the file to functions registered by the host in [`Bindings`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use futures::future::BoxFuture;
use regex::Regex;
use serde::Deserialize;

use crate::error::ModuleError;
use crate::schema::{
    ArgDefinition, ArgSchema, ArgType, ArgValue, CommandDefinition, CommandMeta, Handler,
    Validator,
};

/// File name that marks a directory as a command.
pub const ENTRY_FILE: &str = "command.toml";

/// Turns an entry file into command metadata or a full definition.
///
/// `load_metadata` must not need the handler: listing commands and global
/// help only ever call it.
pub trait ModuleLoader: Send + Sync {
    fn load_metadata<'a>(&'a self, entry: &'a Path) -> BoxFuture<'a, Result<CommandMeta, ModuleError>>;

    fn load_definition<'a>(
        &'a self,
        entry: &'a Path,
    ) -> BoxFuture<'a, Result<CommandDefinition, ModuleError>>;
}

/// Command name derived from an entry file path: its parent directory name.
pub fn command_name_from_entry(entry: &Path) -> Option<String> {
    entry
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
}

/// Handler and validator functions a host makes available to entry files.
#[derive(Clone, Default)]
pub struct Bindings {
    handlers: HashMap<String, Handler>,
    validators: HashMap<String, Validator>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn with_validator(mut self, name: impl Into<String>, validator: Validator) -> Self {
        self.validators.insert(name.into(), validator);
        self
    }

    pub fn handler(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).cloned()
    }

    pub fn validator(&self, name: &str) -> Option<Validator> {
        self.validators.get(name).cloned()
    }
}

#[derive(Deserialize)]
struct RawMetaOnly {
    #[serde(alias = "cfg")]
    meta: Option<CommandMeta>,
}

#[derive(Deserialize)]
struct RawModule {
    handler: Option<String>,
    #[serde(alias = "cfg")]
    meta: Option<CommandMeta>,
    args: Option<BTreeMap<String, RawArg>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawArg {
    #[serde(rename = "type")]
    arg_type: ArgType,
    #[serde(default)]
    required: bool,
    default: Option<toml::Value>,
    #[serde(default)]
    aliases: Vec<String>,
    allowed: Option<Vec<toml::Value>>,
    validate: Option<String>,
    pattern: Option<String>,
    description: Option<String>,
}

/// Reads `command.toml` entry files.
pub struct TomlModuleLoader {
    bindings: Bindings,
}

impl TomlModuleLoader {
    pub fn new(bindings: Bindings) -> Self {
        Self { bindings }
    }

    async fn read(entry: &Path) -> Result<String, ModuleError> {
        tokio::fs::read_to_string(entry)
            .await
            .map_err(|source| ModuleError::Io {
                path: entry.to_path_buf(),
                source,
            })
    }

    fn syntax(entry: &Path, err: toml::de::Error) -> ModuleError {
        ModuleError::Syntax {
            path: entry.to_path_buf(),
            message: err.message().to_string(),
        }
    }

    fn build_definition(&self, entry: &Path, raw: RawModule) -> Result<CommandDefinition, ModuleError> {
        let meta = raw.meta.ok_or(ModuleError::MissingMetadata)?;
        let raw_args = raw.args.ok_or(ModuleError::MissingArgs)?;

        let handler_name = raw
            .handler
            .or_else(|| command_name_from_entry(entry))
            .unwrap_or_else(|| meta.name.clone());
        let handler = self
            .bindings
            .handler(&handler_name)
            .ok_or(ModuleError::MissingHandler(handler_name))?;

        let mut args = ArgSchema::new();
        for (key, raw_arg) in raw_args {
            let definition = self.build_arg(&key, raw_arg)?;
            args.insert(key, definition);
        }

        Ok(CommandDefinition {
            meta,
            args,
            handler,
        })
    }

    fn build_arg(&self, key: &str, raw: RawArg) -> Result<ArgDefinition, ModuleError> {
        let invalid = |message: String| ModuleError::InvalidArg {
            flag: key.to_string(),
            message,
        };

        let default = raw
            .default
            .map(|value| coerce_toml(value, raw.arg_type))
            .transpose()
            .map_err(|message| invalid(format!("default {}", message)))?;

        let allowed = raw
            .allowed
            .map(|values| {
                values
                    .into_iter()
                    .map(|value| coerce_toml(value, raw.arg_type))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(|message| invalid(format!("allowed value {}", message)))?;

        let pattern = raw
            .pattern
            .map(|pattern| Regex::new(&pattern))
            .transpose()
            .map_err(|err| invalid(format!("invalid pattern: {}", err)))?;

        let validate = match raw.validate {
            Some(name) => Some(self.bindings.validator(&name).ok_or_else(|| {
                ModuleError::UnknownValidator {
                    flag: key.to_string(),
                    validator: name,
                }
            })?),
            None => None,
        };

        Ok(ArgDefinition {
            arg_type: raw.arg_type,
            required: raw.required,
            default,
            aliases: raw.aliases,
            allowed,
            validate,
            pattern,
            description: raw.description,
        })
    }
}

fn coerce_toml(value: toml::Value, expected: ArgType) -> Result<ArgValue, String> {
    match (expected, value) {
        (ArgType::String, toml::Value::String(s)) => Ok(ArgValue::String(s)),
        (ArgType::Boolean, toml::Value::Boolean(b)) => Ok(ArgValue::Bool(b)),
        (ArgType::Number, toml::Value::Integer(i)) => Ok(ArgValue::Number(i as f64)),
        (ArgType::Number, toml::Value::Float(f)) if f.is_finite() => Ok(ArgValue::Number(f)),
        (expected, other) => Err(format!(
            "must be a {}, found `{}`",
            expected,
            other.to_string().trim()
        )),
    }
}

impl ModuleLoader for TomlModuleLoader {
    fn load_metadata<'a>(&'a self, entry: &'a Path) -> BoxFuture<'a, Result<CommandMeta, ModuleError>> {
        Box::pin(async move {
            let content = Self::read(entry).await?;
            let raw: RawMetaOnly =
                toml::from_str(&content).map_err(|err| Self::syntax(entry, err))?;
            raw.meta.ok_or(ModuleError::MissingMetadata)
        })
    }

    fn load_definition<'a>(
        &'a self,
        entry: &'a Path,
    ) -> BoxFuture<'a, Result<CommandDefinition, ModuleError>> {
        Box::pin(async move {
            let content = Self::read(entry).await?;
            let raw: RawModule =
                toml::from_str(&content).map_err(|err| Self::syntax(entry, err))?;
            self.build_definition(entry, raw)
        })
    }
}
