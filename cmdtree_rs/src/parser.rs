//! Schema-driven flag parsing.
//!
//! Flags are matched against a command's [`ArgSchema`] by declared key,
//! alias or any casing of the key (`--dry-run`, `--dryRun`, `--dry_run`).
//! Positional tokens are ignored; subcommand routing happens before parsing.

use std::collections::{BTreeMap, HashMap, HashSet};

use heck::ToKebabCase;
use serde::Serialize;

use crate::error::LauncherError;
use crate::schema::{ArgDefinition, ArgSchema, ArgType, ArgValue};
use crate::suggest::suggest_similar;

/// Parsed flag values keyed by declared flag key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParsedArgs(BTreeMap<String, ArgValue>);

impl ParsedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ArgValue::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ArgValue::as_bool)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ArgValue::as_f64)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn into_inner(self) -> BTreeMap<String, ArgValue> {
        self.0
    }

    fn insert(&mut self, key: String, value: ArgValue) {
        self.0.insert(key, value);
    }
}

impl<K: Into<String>, V: Into<ArgValue>> FromIterator<(K, V)> for ParsedArgs {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Lookup tables derived from one schema.
#[derive(Debug)]
pub(crate) struct SchemaIndex {
    keys: Vec<String>,
    exact: HashSet<String>,
    aliases: HashMap<String, String>,
    normalized: HashMap<String, String>,
    defaults: BTreeMap<String, ArgValue>,
    required: Vec<String>,
}

impl SchemaIndex {
    pub(crate) fn build(schema: &ArgSchema) -> Self {
        let mut index = SchemaIndex {
            keys: Vec::with_capacity(schema.len()),
            exact: HashSet::new(),
            aliases: HashMap::new(),
            normalized: HashMap::new(),
            defaults: BTreeMap::new(),
            required: Vec::new(),
        };

        for (key, definition) in schema.iter() {
            index.keys.push(key.to_string());
            index.exact.insert(key.to_string());
            index
                .normalized
                .entry(key.to_kebab_case())
                .or_insert_with(|| key.to_string());
            for alias in &definition.aliases {
                index
                    .aliases
                    .entry(alias.clone())
                    .or_insert_with(|| key.to_string());
            }
            if let Some(default) = &definition.default {
                index.defaults.insert(key.to_string(), default.clone());
            }
            if definition.required {
                index.required.push(key.to_string());
            }
        }
        index
    }

    /// Declared key for a flag name (without dashes): alias, exact key,
    /// then any casing of a key.
    pub(crate) fn resolve(&self, flag: &str) -> Option<&str> {
        if let Some(key) = self.aliases.get(flag) {
            return Some(key);
        }
        if let Some(key) = self.exact.get(flag) {
            return Some(key);
        }
        self.normalized.get(&flag.to_kebab_case()).map(String::as_str)
    }

    /// Key of a boolean flag written in `no-<flag>` form. Only used to route
    /// tokens between parent and child; `parse_args` does not accept it.
    fn resolve_negated(&self, flag: &str, schema: &ArgSchema) -> Option<String> {
        let rest = flag.strip_prefix("no-")?;
        let key = self.resolve(rest)?;
        (schema.get(key)?.arg_type == ArgType::Boolean).then(|| key.to_string())
    }
}

/// How a flag is shown in messages and help: `--` plus the kebab-case key.
pub fn display_flag(key: &str) -> String {
    format!("--{}", key.to_kebab_case())
}

fn is_flag(token: &str) -> bool {
    token.starts_with('-') && token != "-" && token != "--"
}

/// Flag name without leading dashes, and an inline `=value` if present.
fn split_flag(token: &str) -> (&str, Option<&str>) {
    let body = token.trim_start_matches('-');
    match body.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (body, None),
    }
}

/// Parse `tokens` against `schema`.
///
/// Returns explicit values merged over declared defaults. Fails with
/// [`LauncherError::ArgumentValidation`] on an unknown flag, a missing or
/// malformed value, a value rejected by `allowed`, `pattern` or the
/// validator, or a missing required flag.
pub fn parse_args<S: AsRef<str>>(
    tokens: &[S],
    schema: &ArgSchema,
) -> Result<ParsedArgs, LauncherError> {
    let index = schema.index();
    let mut parsed = ParsedArgs(index.defaults.clone());

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i].as_ref();
        i += 1;
        if !is_flag(token) {
            continue;
        }

        let (name, inline) = split_flag(token);
        let Some(key) = index.resolve(name) else {
            return Err(unknown_flag(name, index));
        };
        let Some(definition) = schema.get(key) else {
            return Err(unknown_flag(name, index));
        };
        let flag = display_flag(key);

        let value = match definition.arg_type {
            ArgType::Boolean => {
                if inline.is_some() {
                    return Err(LauncherError::validation(format!(
                        "flag `{}` is a boolean and takes no value",
                        flag
                    )));
                }
                ArgValue::Bool(true)
            }
            arg_type => {
                let raw = match inline {
                    Some(raw) => raw,
                    None => match tokens.get(i).map(AsRef::as_ref) {
                        Some(next) if !next.starts_with('-') => {
                            i += 1;
                            next
                        }
                        _ => {
                            return Err(LauncherError::validation(format!(
                                "flag `{}` expects a {} value",
                                flag, arg_type
                            )));
                        }
                    },
                };
                coerce(&flag, raw, definition)?
            }
        };

        parsed.insert(key.to_string(), value);
    }

    for key in &index.required {
        if !parsed.contains(key) {
            return Err(LauncherError::validation(format!(
                "missing required flag `{}`",
                display_flag(key)
            )));
        }
    }

    Ok(parsed)
}

fn coerce(flag: &str, raw: &str, definition: &ArgDefinition) -> Result<ArgValue, LauncherError> {
    let value = match definition.arg_type {
        ArgType::Number => match raw.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => ArgValue::Number(n),
            _ => {
                return Err(LauncherError::validation(format!(
                    "flag `{}` expects a number, got `{}`",
                    flag, raw
                )));
            }
        },
        ArgType::Boolean => ArgValue::Bool(true),
        ArgType::String => ArgValue::String(raw.to_string()),
    };

    if let Some(allowed) = definition.allowed.as_ref().filter(|allowed| !allowed.contains(&value)) {
        let choices: Vec<String> = allowed.iter().map(ToString::to_string).collect();
        return Err(LauncherError::validation(format!(
            "flag `{}` must be one of: {} (got `{}`)",
            flag,
            choices.join(", "),
            raw
        )));
    }

    if let Some(pattern) = definition.pattern.as_ref().filter(|pattern| !pattern.is_match(raw)) {
        return Err(LauncherError::validation(format!(
            "flag `{}` must match `{}` (got `{}`)",
            flag,
            pattern.as_str(),
            raw
        )));
    }

    if let Some(validate) = &definition.validate {
        validate(&value).map_err(LauncherError::validation)?;
    }

    Ok(value)
}

fn unknown_flag(name: &str, index: &SchemaIndex) -> LauncherError {
    let flag = format!("--{}", name);
    if index.keys.is_empty() {
        return LauncherError::validation(format!("unknown flag `{}`; this command takes no flags", flag));
    }

    let mut message = format!("unknown flag `{}`", flag);
    let candidates: Vec<String> = index.keys.iter().map(|k| k.to_kebab_case()).collect();
    if let Some(suggestion) = suggest_similar(&name.to_kebab_case(), candidates.iter().map(String::as_str)) {
        message.push_str(&format!(". Did you mean `--{}`?", suggestion));
    }
    let valid: Vec<String> = index.keys.iter().map(|k| display_flag(k)).collect();
    message.push_str(&format!("\nvalid flags: {}", valid.join(", ")));
    LauncherError::validation(message)
}

/// Tokens of a two-level invocation split between parent and child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSplit {
    pub parent: Vec<String>,
    pub child: Vec<String>,
}

/// Route each flag to the schema that declares it.
///
/// A flag declared by both schemas goes to the child. A parent-owned
/// non-boolean flag takes the following non-flag token with it. Everything
/// else, including flags neither side knows, stays with the child so its
/// parse reports them.
pub fn split_parent_flags<S: AsRef<str>>(
    tokens: &[S],
    parent: &ArgSchema,
    child: &ArgSchema,
) -> FlagSplit {
    let parent_index = parent.index();
    let child_index = child.index();
    let mut split = FlagSplit::default();

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i].as_ref();
        i += 1;
        if !is_flag(token) {
            split.child.push(token.to_string());
            continue;
        }

        let (name, inline) = split_flag(token);
        let child_owns = child_index.resolve(name).is_some()
            || child_index.resolve_negated(name, child).is_some();
        if child_owns {
            split.child.push(token.to_string());
            continue;
        }

        if let Some(definition) = parent_index.resolve(name).and_then(|key| parent.get(key)) {
            split.parent.push(token.to_string());
            let takes_value = definition.arg_type != ArgType::Boolean && inline.is_none();
            match tokens.get(i).map(AsRef::as_ref) {
                Some(next) if takes_value && !next.starts_with('-') => {
                    split.parent.push(next.to_string());
                    i += 1;
                }
                _ => {}
            }
        } else if parent_index.resolve_negated(name, parent).is_some() {
            split.parent.push(token.to_string());
        } else {
            split.child.push(token.to_string());
        }
    }

    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::schema::validator;
    use regex::Regex;

    fn verbose_name_schema() -> ArgSchema {
        ArgSchema::new()
            .with("verbose", ArgDefinition::boolean().alias("v"))
            .with("name", ArgDefinition::string().required())
    }

    fn message(err: LauncherError) -> String {
        assert_eq!(err.code(), ErrorCode::ArgumentValidation);
        err.to_string()
    }

    #[test]
    fn test_alias_and_required() {
        let schema = verbose_name_schema();
        let parsed = parse_args(&["-v", "--name", "x"], &schema).expect("parse");
        assert_eq!(
            parsed,
            [("verbose", ArgValue::Bool(true)), ("name", ArgValue::from("x"))]
                .into_iter()
                .collect()
        );

        let err = parse_args(&["--verbose"], &schema).expect_err("name is required");
        assert!(message(err).contains("`--name`"));
    }

    #[test]
    fn test_number_must_parse() {
        let schema = ArgSchema::new().with("port", ArgDefinition::number());
        let err = parse_args(&["--port", "abc"], &schema).expect_err("not a number");
        let text = message(err);
        assert!(text.contains("`--port`"));
        assert!(text.contains("number"));

        for bad in ["NaN", "inf", "-inf", "infinity"] {
            assert!(parse_args(&[format!("--port={}", bad)], &schema).is_err(), "{}", bad);
        }
        let parsed = parse_args(&["--port", "8080"], &schema).expect("parse");
        assert_eq!(parsed.get_f64("port"), Some(8080.0));
    }

    #[test]
    fn test_defaults_merge_under_explicit_values() {
        let schema = ArgSchema::new()
            .with("port", ArgDefinition::number().default_value(3000i64))
            .with("host", ArgDefinition::string().default_value("localhost"));

        let parsed = parse_args::<&str>(&[], &schema).expect("parse");
        assert_eq!(parsed.get_f64("port"), Some(3000.0));
        assert_eq!(parsed.get_str("host"), Some("localhost"));

        let parsed = parse_args(&["--port", "1"], &schema).expect("parse");
        assert_eq!(parsed.get_f64("port"), Some(1.0));
        assert_eq!(parsed.get_str("host"), Some("localhost"));
    }

    #[test]
    fn test_required_satisfied_by_default() {
        let schema = ArgSchema::new().with("env", ArgDefinition::string().required().default_value("dev"));
        assert_eq!(parse_args::<&str>(&[], &schema).expect("parse").get_str("env"), Some("dev"));
    }

    #[test]
    fn test_missing_value_and_dash_value() {
        let schema = ArgSchema::new().with("name", ArgDefinition::string());
        assert!(message(parse_args(&["--name"], &schema).expect_err("no value")).contains("expects a string"));
        assert!(parse_args(&["--name", "--other"], &schema).is_err());
        let parsed = parse_args(&["--name=-dash"], &schema).expect("inline value");
        assert_eq!(parsed.get_str("name"), Some("-dash"));
    }

    #[test]
    fn test_boolean_rejects_inline_value() {
        let schema = ArgSchema::new().with("verbose", ArgDefinition::boolean());
        assert!(parse_args(&["--verbose=false"], &schema).is_err());
        let parsed = parse_args(&["--verbose", "false"], &schema).expect("positional ignored");
        assert_eq!(parsed.get_bool("verbose"), Some(true));
    }

    #[test]
    fn test_boolean_has_no_negated_form() {
        let schema = ArgSchema::new().with("verbose", ArgDefinition::boolean().alias("v"));
        let err = parse_args(&["--no-verbose"], &schema).expect_err("negated form rejected");
        assert_eq!(err.code(), ErrorCode::ArgumentValidation);
        assert!(message(err).contains("unknown flag `--no-verbose`"));

        for (tokens, expected) in [(vec!["--verbose"], Some(true)), (vec!["-v"], Some(true)), (vec![], None)] {
            let parsed = parse_args(&tokens, &schema).expect("parse");
            assert_eq!(parsed.get_bool("verbose"), expected, "{:?}", tokens);
        }
    }

    #[test]
    fn test_casing_variants_resolve() {
        let schema = ArgSchema::new().with("dryRun", ArgDefinition::boolean());
        for token in ["--dry-run", "--dryRun", "--dry_run"] {
            let parsed = parse_args(&[token], &schema).expect(token);
            assert_eq!(parsed.get_bool("dryRun"), Some(true), "{}", token);
        }
    }

    #[test]
    fn test_unknown_flag_lists_keys_and_suggests() {
        let schema = verbose_name_schema();
        let text = message(parse_args(&["--verbos", "--name", "x"], &schema).expect_err("unknown"));
        assert!(text.contains("unknown flag `--verbos`"));
        assert!(text.contains("Did you mean `--verbose`?"));
        assert!(text.contains("--name, --verbose"));

        let empty = ArgSchema::new();
        assert!(message(parse_args(&["--x"], &empty).expect_err("unknown")).contains("takes no flags"));
    }

    #[test]
    fn test_allowed_pattern_and_validator() {
        let schema = ArgSchema::new()
            .with("env", ArgDefinition::string().allowed(["dev", "prod"]))
            .with(
                "tag",
                ArgDefinition::string().pattern(Regex::new(r"^v\d+$").expect("regex")),
            )
            .with(
                "port",
                ArgDefinition::number().validate(validator(|v| match v.as_f64() {
                    Some(n) if (1.0..=65535.0).contains(&n) => Ok(()),
                    _ => Err("port out of range".to_string()),
                })),
            );

        assert!(message(parse_args(&["--env", "qa"], &schema).expect_err("allowed")).contains("dev, prod"));
        assert!(parse_args(&["--tag", "latest"], &schema).is_err());
        assert_eq!(
            message(parse_args(&["--port", "70000"], &schema).expect_err("validator")),
            "port out of range"
        );

        let parsed = parse_args(&["--env", "prod", "--tag", "v2", "--port", "80"], &schema).expect("parse");
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn test_last_occurrence_wins_and_positionals_skipped() {
        let schema = ArgSchema::new().with("name", ArgDefinition::string());
        let parsed = parse_args(&["pos", "--name", "a", "-", "--", "--name", "b"], &schema).expect("parse");
        assert_eq!(parsed.get_str("name"), Some("b"));
    }

    #[test]
    fn test_split_routes_by_declaring_schema() {
        let parent = ArgSchema::new()
            .with("verbose", ArgDefinition::boolean().alias("v"))
            .with("region", ArgDefinition::string());
        let child = ArgSchema::new().with("force", ArgDefinition::boolean());

        let split = split_parent_flags(&["-v", "--region", "eu", "--force", "extra"], &parent, &child);
        assert_eq!(split.parent, vec!["-v", "--region", "eu"]);
        assert_eq!(split.child, vec!["--force", "extra"]);

        let split = split_parent_flags(&["--no-verbose", "--unknown"], &parent, &child);
        assert_eq!(split.parent, vec!["--no-verbose"]);
        assert_eq!(split.child, vec!["--unknown"]);
    }

    #[test]
    fn test_split_child_wins_ties() {
        let parent = ArgSchema::new().with("verbose", ArgDefinition::boolean());
        let child = ArgSchema::new().with("verbose", ArgDefinition::boolean());
        let split = split_parent_flags(&["--verbose"], &parent, &child);
        assert!(split.parent.is_empty());
        assert_eq!(split.child, vec!["--verbose"]);
    }

    #[test]
    fn test_split_then_parse_each_side() {
        let parent = ArgSchema::new().with("region", ArgDefinition::string().default_value("us"));
        let child = ArgSchema::new().with("branch", ArgDefinition::string().required());

        let split = split_parent_flags(&["--branch", "main", "--region=eu"], &parent, &child);
        let parent_args = parse_args(&split.parent, &parent).expect("parent");
        let child_args = parse_args(&split.child, &child).expect("child");
        assert_eq!(parent_args.get_str("region"), Some("eu"));
        assert_eq!(child_args.get_str("branch"), Some("main"));
    }

    #[test]
    fn test_region_to_parent_dry_run_to_child() {
        let parent = ArgSchema::new().with("region", ArgDefinition::string());
        let child = ArgSchema::new().with("dryRun", ArgDefinition::boolean());

        let split = split_parent_flags(&["--dry-run", "--region", "us-east"], &parent, &child);
        assert_eq!(split.parent, vec!["--region", "us-east"]);
        assert_eq!(split.child, vec!["--dry-run"]);
        assert_eq!(
            parse_args(&split.child, &child).expect("child").get_bool("dryRun"),
            Some(true)
        );
    }

    #[test]
    fn test_index_is_memoized_per_schema() {
        let schema = verbose_name_schema();
        let first: *const SchemaIndex = schema.index();
        let second: *const SchemaIndex = schema.index();
        assert_eq!(first, second);
        assert_eq!(schema.index().resolve("v"), Some("verbose"));
    }
}
