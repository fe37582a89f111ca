//! Help text for the whole command tree and for single commands.
//!
//! Global help only needs display metadata, so it never loads a command's
//! full definition.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::LauncherError;
use crate::node::CommandNode;
use crate::parser::display_flag;
use crate::registry::Registry;
use crate::schema::{ArgDefinition, ArgSchema, ArgType, CommandDefinition, CommandMeta};

const MIN_LABEL_WIDTH: usize = 18;

type MetaResults = BTreeMap<String, Result<Arc<CommandMeta>, LauncherError>>;

/// Program-level help: usage plus every command, children indented
/// beneath their parent.
pub async fn render_global_help(
    registry: &Registry,
    program: &str,
    version: &str,
    concurrency: usize,
) -> String {
    let metadata = registry.load_all_metadata(concurrency).await;

    let mut rows = Vec::new();
    for root in registry.root_names() {
        collect_rows(registry, &metadata, root, 0, &mut rows);
    }

    let mut help = String::new();
    help.push_str(&format!("{} {}\n\n", program, version));
    help.push_str("USAGE:\n");
    help.push_str(&format!("    {} <command> [OPTIONS]\n", program));
    help.push_str(&format!("    {} <command> <subcommand> [OPTIONS]\n", program));
    help.push_str(&format!("    {} <command> --help     # Command-specific help\n\n", program));

    help.push_str("COMMANDS:\n");
    if rows.is_empty() {
        help.push_str("    (no commands found)\n");
    } else {
        push_rows(&mut help, &rows);
    }

    help.push_str("\nGLOBAL OPTIONS:\n");
    push_rows(
        &mut help,
        &[
            ("--help, -h".to_string(), "Show this help".to_string()),
            ("--version, -V".to_string(), "Show version".to_string()),
        ],
    );
    help
}

fn collect_rows(
    registry: &Registry,
    metadata: &MetaResults,
    name: &str,
    level: usize,
    rows: &mut Vec<(String, String)>,
) {
    let indent = "  ".repeat(level);
    let row = match metadata.get(name) {
        Some(Ok(meta)) => (
            format!("{}{}{}", indent, name, alias_suffix(&meta.aliases)),
            meta.description.clone(),
        ),
        _ => (format!("{}{}", indent, name), "(failed to load)".to_string()),
    };
    rows.push(row);

    if let Some(node) = registry.get(name) {
        for child in node.children() {
            collect_rows(registry, metadata, child, level + 1, rows);
        }
    }
}

fn alias_suffix(aliases: &[String]) -> String {
    if aliases.is_empty() {
        String::new()
    } else {
        format!(" ({})", aliases.join(", "))
    }
}

fn push_rows(help: &mut String, rows: &[(String, String)]) {
    let width = rows
        .iter()
        .map(|(label, _)| label.chars().count())
        .max()
        .unwrap_or(0)
        .max(MIN_LABEL_WIDTH);
    for (label, description) in rows {
        if description.is_empty() {
            help.push_str(&format!("    {}\n", label));
        } else {
            help.push_str(&format!("    {:<width$}  {}\n", label, description, width = width));
        }
    }
}

/// Everything per-command help shows.
pub struct CommandHelp<'a> {
    pub program: &'a str,
    /// Command names from the root down to the command itself.
    pub chain: Vec<String>,
    pub definition: &'a CommandDefinition,
    /// Parent definition in a two-level invocation; its flags are accepted too.
    pub parent: Option<&'a CommandDefinition>,
    pub subcommands: BTreeMap<String, Result<Arc<CommandMeta>, LauncherError>>,
}

impl<'a> CommandHelp<'a> {
    /// Gather help input for the last node of `chain`.
    pub async fn collect(
        registry: &Registry,
        program: &'a str,
        chain: &[Arc<CommandNode>],
        definition: &'a CommandDefinition,
        parent: Option<&'a CommandDefinition>,
    ) -> CommandHelp<'a> {
        let mut subcommands = BTreeMap::new();
        if let Some(node) = chain.last() {
            for child in node.children() {
                if let Some(child_node) = registry.get(child) {
                    subcommands.insert(child.clone(), child_node.metadata().await);
                }
            }
        }
        CommandHelp {
            program,
            chain: chain.iter().map(|node| node.name().to_string()).collect(),
            definition,
            parent,
            subcommands,
        }
    }

    pub fn render(&self) -> String {
        let meta = &self.definition.meta;
        let mut help = String::new();

        match &meta.version {
            Some(version) => help.push_str(&format!("{} v{}\n", meta.name, version)),
            None => help.push_str(&format!("{}\n", meta.name)),
        }
        if !meta.description.is_empty() {
            help.push_str(&format!("{}\n", meta.description));
        }

        let invocation = std::iter::once(self.program.to_string())
            .chain(self.chain.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        help.push_str("\nUSAGE:\n");
        help.push_str(&format!("    {} [OPTIONS]\n", invocation));
        if !self.subcommands.is_empty() {
            help.push_str(&format!("    {} <subcommand> [OPTIONS]\n", invocation));
        }

        if !meta.aliases.is_empty() {
            help.push_str(&format!("\nALIASES:\n    {}\n", meta.aliases.join(", ")));
        }

        help.push_str("\nOPTIONS:\n");
        let mut options = option_rows(&self.definition.args);
        options.push(("--help, -h".to_string(), "Show this help".to_string()));
        push_rows(&mut help, &options);

        if let Some(parent) = self.parent {
            let rows = option_rows(&parent.args);
            if !rows.is_empty() {
                help.push_str(&format!("\n{} OPTIONS:\n", parent.meta.name.to_uppercase()));
                push_rows(&mut help, &rows);
            }
        }

        if !self.subcommands.is_empty() {
            help.push_str("\nSUBCOMMANDS:\n");
            let rows: Vec<(String, String)> = self
                .subcommands
                .iter()
                .map(|(name, meta)| match meta {
                    Ok(meta) => (
                        format!("{}{}", name, alias_suffix(&meta.aliases)),
                        meta.description.clone(),
                    ),
                    Err(_) => (name.clone(), "(failed to load)".to_string()),
                })
                .collect();
            push_rows(&mut help, &rows);
        }

        if !meta.examples.is_empty() {
            help.push_str("\nEXAMPLES:\n");
            for example in &meta.examples {
                help.push_str(&format!("    {}\n", example));
            }
        }

        help
    }
}

fn option_rows(schema: &ArgSchema) -> Vec<(String, String)> {
    schema
        .iter()
        .map(|(key, definition)| (option_label(key, definition), option_description(definition)))
        .collect()
}

fn option_label(key: &str, definition: &ArgDefinition) -> String {
    let mut names = vec![display_flag(key)];
    names.extend(definition.aliases.iter().map(|alias| {
        if alias.chars().count() == 1 {
            format!("-{}", alias)
        } else {
            format!("--{}", alias)
        }
    }));
    let mut label = names.join(", ");
    if definition.arg_type != ArgType::Boolean {
        label.push_str(&format!(" <{}>", definition.arg_type));
    }
    label
}

fn option_description(definition: &ArgDefinition) -> String {
    let mut parts = Vec::new();
    if let Some(description) = &definition.description {
        parts.push(description.clone());
    }
    if definition.required {
        parts.push("(required)".to_string());
    }
    if let Some(default) = &definition.default {
        parts.push(format!("[default: {}]", default));
    }
    if let Some(allowed) = &definition.allowed {
        let values: Vec<String> = allowed.iter().map(ToString::to_string).collect();
        parts.push(format!("[possible values: {}]", values.join(", ")));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Discovery;
    use crate::testing::{CountingLoader, command_tree, deploy_tree, wide_tree};
    use std::time::Duration;

    #[tokio::test]
    async fn test_global_help_lists_tree_without_definitions() {
        let temp = deploy_tree();
        let loader = CountingLoader::shared();
        let registry = Discovery::new("commands", temp.path(), loader.clone())
            .discover()
            .await
            .expect("discover");

        let help = render_global_help(&registry, "cmdt", "0.1.0", 5).await;
        assert!(help.starts_with("cmdt 0.1.0\n"));
        assert!(help.contains("build (b)"));
        assert!(help.contains("Deploy the application"));
        assert!(help.contains("\n      production (prod)"));

        let build = help.find("build (b)").expect("build row");
        let deploy = help.find("deploy (d)").expect("deploy row");
        let staging = help.find("  staging").expect("staging row");
        assert!(build < deploy && deploy < staging);
        assert_eq!(loader.definition_loads(), 0);
    }

    #[tokio::test]
    async fn test_global_help_bounds_metadata_loads() {
        let temp = wide_tree(12);
        let loader = CountingLoader::slow(Duration::from_millis(10));
        let registry = Discovery::new("commands", temp.path(), loader.clone())
            .discover()
            .await
            .expect("discover");

        let help = render_global_help(&registry, "cmdt", "0.1.0", 5).await;
        assert!(help.contains("cmd00"));
        assert!(help.contains("cmd11"));
        assert_eq!(loader.metadata_loads(), 12);
        assert!(loader.peak_metadata_loads() <= 5, "peak {}", loader.peak_metadata_loads());
        assert!(loader.peak_metadata_loads() > 1);
    }

    #[tokio::test]
    async fn test_global_help_marks_broken_commands() {
        let temp = command_tree(&[("broken", "not = [valid")]);
        let registry = Discovery::new("commands", temp.path(), CountingLoader::shared())
            .discover()
            .await
            .expect("discover");
        let help = render_global_help(&registry, "cmdt", "0.1.0", 5).await;
        assert!(help.contains("broken"));
        assert!(help.contains("(failed to load)"));
    }

    #[tokio::test]
    async fn test_command_help_shows_options_and_subcommands() {
        let temp = deploy_tree();
        let registry = Discovery::new("commands", temp.path(), CountingLoader::shared())
            .discover()
            .await
            .expect("discover");

        let chain = registry.resolve_command_chain(&["deploy"]).expect("chain");
        let definition = chain[0].definition().await.expect("definition");
        let help = CommandHelp::collect(&registry, "cmdt", &chain, &definition, None)
            .await
            .render();

        assert!(help.starts_with("deploy v2.1.0\n"));
        assert!(help.contains("cmdt deploy <subcommand> [OPTIONS]"));
        assert!(help.contains("--region <string>"));
        assert!(help.contains("[default: us-east]"));
        assert!(help.contains("--verbose, -v"));
        assert!(help.contains("SUBCOMMANDS:"));
        assert!(help.contains("production (prod)"));
    }

    #[tokio::test]
    async fn test_child_help_includes_parent_options() {
        let temp = deploy_tree();
        let registry = Discovery::new("commands", temp.path(), CountingLoader::shared())
            .discover()
            .await
            .expect("discover");

        let chain = registry
            .resolve_command_chain(&["deploy", "production"])
            .expect("chain");
        let parent = chain[0].definition().await.expect("parent");
        let child = chain[1].definition().await.expect("child");
        let help = CommandHelp::collect(&registry, "cmdt", &chain, &child, Some(&*parent))
            .await
            .render();

        assert!(help.contains("cmdt deploy production [OPTIONS]"));
        assert!(help.contains("--confirm"));
        assert!(help.contains("(required)"));
        assert!(help.contains("DEPLOY OPTIONS:"));
        assert!(!help.contains("SUBCOMMANDS:"));
    }

    #[tokio::test]
    async fn test_examples_and_allowed_values() {
        let temp = deploy_tree();
        let registry = Discovery::new("commands", temp.path(), CountingLoader::shared())
            .discover()
            .await
            .expect("discover");
        let chain = registry.resolve_command_chain(&["build"]).expect("chain");
        let definition = chain[0].definition().await.expect("definition");
        let help = CommandHelp::collect(&registry, "cmdt", &chain, &definition, None)
            .await
            .render();

        assert!(help.contains("ALIASES:\n    b"));
        assert!(help.contains("[possible values: debug, release]"));
        assert!(help.contains("EXAMPLES:\n    build --target release"));
    }
}
