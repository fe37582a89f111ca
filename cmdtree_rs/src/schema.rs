//! The command module contract: metadata, flag schema, handler.
//!
//! A command module is what a command directory's entry file loads into.
//! Display metadata ([`CommandMeta`]) is cheap and cacheable; the full
//! [`CommandDefinition`] additionally binds the handler and the flag
//! schema and is only loaded for the command actually being run.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::{ParsedArgs, SchemaIndex};

/// Value type of a declared flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    String,
    Boolean,
    Number,
}

impl ArgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Boolean => "boolean",
            ArgType::Number => "number",
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coerced flag value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(b) => write!(f, "{}", b),
            // Integral numbers print without a trailing `.0`.
            ArgValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            ArgValue::Number(n) => write!(f, "{}", n),
            ArgValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::String(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::String(value)
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Number(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Number(value as f64)
    }
}

/// Custom flag validator. `Err(message)` rejects the value with that message.
pub type Validator = Arc<dyn Fn(&ArgValue) -> Result<(), String> + Send + Sync>;

/// Wrap a closure as a [`Validator`].
pub fn validator<F>(f: F) -> Validator
where
    F: Fn(&ArgValue) -> Result<(), String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Declaration of a single flag.
#[derive(Clone)]
pub struct ArgDefinition {
    pub arg_type: ArgType,
    pub required: bool,
    pub default: Option<ArgValue>,
    pub aliases: Vec<String>,
    pub allowed: Option<Vec<ArgValue>>,
    pub validate: Option<Validator>,
    pub pattern: Option<Regex>,
    pub description: Option<String>,
}

impl ArgDefinition {
    pub fn new(arg_type: ArgType) -> Self {
        Self {
            arg_type,
            required: false,
            default: None,
            aliases: Vec::new(),
            allowed: None,
            validate: None,
            pattern: None,
            description: None,
        }
    }

    pub fn string() -> Self {
        Self::new(ArgType::String)
    }

    pub fn boolean() -> Self {
        Self::new(ArgType::Boolean)
    }

    pub fn number() -> Self {
        Self::new(ArgType::Number)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<ArgValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn allowed<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ArgValue>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn validate(mut self, validator: Validator) -> Self {
        self.validate = Some(validator);
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Debug for ArgDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgDefinition")
            .field("arg_type", &self.arg_type)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("aliases", &self.aliases)
            .field("allowed", &self.allowed)
            .field("validate", &self.validate.as_ref().map(|_| "<fn>"))
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("description", &self.description)
            .finish()
    }
}

/// The flag schema of one command.
///
/// Lookup tables used by the parser are computed once per schema value and
/// kept alongside it.
#[derive(Debug, Default)]
pub struct ArgSchema {
    args: BTreeMap<String, ArgDefinition>,
    index: OnceCell<SchemaIndex>,
}

impl ArgSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, definition: ArgDefinition) -> Self {
        self.insert(key, definition);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, definition: ArgDefinition) {
        self.args.insert(key.into(), definition);
        self.index = OnceCell::new();
    }

    pub fn get(&self, key: &str) -> Option<&ArgDefinition> {
        self.args.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.args.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgDefinition)> {
        self.args.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub(crate) fn index(&self) -> &SchemaIndex {
        self.index.get_or_init(|| SchemaIndex::build(self))
    }
}

impl Clone for ArgSchema {
    fn clone(&self) -> Self {
        Self {
            args: self.args.clone(),
            index: OnceCell::new(),
        }
    }
}

impl FromIterator<(String, ArgDefinition)> for ArgSchema {
    fn from_iter<T: IntoIterator<Item = (String, ArgDefinition)>>(iter: T) -> Self {
        Self {
            args: iter.into_iter().collect(),
            index: OnceCell::new(),
        }
    }
}

/// Display metadata of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMeta {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

impl CommandMeta {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            aliases: Vec::new(),
            version: None,
            examples: Vec::new(),
        }
    }
}

/// Parsed flags of the invoking parent in a two-level invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParentContext {
    pub name: String,
    /// `None` when no flag in argv belonged to the parent; the parent
    /// schema is not parsed at all in that case.
    pub args: Option<ParsedArgs>,
}

/// Everything a handler receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub command: String,
    pub args: ParsedArgs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentContext>,
}

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A command handler. Errors it returns are not launcher errors and are
/// propagated to the caller of the dispatcher unchanged.
pub type Handler = Arc<dyn Fn(Invocation) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |invocation| Box::pin(f(invocation)))
}

/// A fully loaded command module.
pub struct CommandDefinition {
    pub meta: CommandMeta,
    pub args: ArgSchema,
    pub handler: Handler,
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("meta", &self.meta)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_value_display() {
        assert_eq!(ArgValue::Number(8080.0).to_string(), "8080");
        assert_eq!(ArgValue::Number(0.5).to_string(), "0.5");
        assert_eq!(ArgValue::Bool(true).to_string(), "true");
        assert_eq!(ArgValue::from("eu").to_string(), "eu");
    }

    #[test]
    fn test_arg_value_serializes_untagged() {
        let json = serde_json::to_string(&vec![
            ArgValue::Bool(true),
            ArgValue::Number(3.0),
            ArgValue::from("x"),
        ])
        .unwrap();
        assert_eq!(json, "[true,3.0,\"x\"]");
    }

    #[test]
    fn test_meta_skips_empty_optionals() {
        let meta = CommandMeta::new("build", "Build it");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json, serde_json::json!({"name": "build", "description": "Build it"}));
    }

    #[test]
    fn test_schema_builder_and_clone() {
        let schema = ArgSchema::new()
            .with("verbose", ArgDefinition::boolean().alias("v"))
            .with("port", ArgDefinition::number().default_value(3000i64));
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.keys().collect::<Vec<_>>(), vec!["port", "verbose"]);

        let cloned = schema.clone();
        assert_eq!(cloned.get("verbose").unwrap().aliases, vec!["v".to_string()]);
        assert!(format!("{:?}", cloned).contains("ArgDefinition"));
    }
}
