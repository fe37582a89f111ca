//! Error taxonomy shared by discovery, resolution, parsing and dispatch.
//!
//! Every error a host application may want to react to is a
//! [`LauncherError`]. Each variant maps to a stable [`ErrorCode`] so callers
//! can branch on `err.code()` instead of matching message text.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Machine-readable error code carried by every [`LauncherError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    CommandNotFound,
    ArgumentValidation,
    CommandLoad,
    DiscoveryFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CommandNotFound => "COMMAND_NOT_FOUND",
            ErrorCode::ArgumentValidation => "ARGUMENT_VALIDATION",
            ErrorCode::CommandLoad => "COMMAND_LOAD",
            ErrorCode::DiscoveryFailed => "DISCOVERY_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command entry file that could not be turned into metadata or a definition.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid entry file {}: {message}", path.display())]
    Syntax { path: PathBuf, message: String },

    #[error("missing `meta` (or `cfg`) table")]
    MissingMetadata,

    #[error("missing `args` table")]
    MissingArgs,

    #[error("no handler registered as `{0}`")]
    MissingHandler(String),

    #[error("flag `{flag}` references unknown validator `{validator}`")]
    UnknownValidator { flag: String, validator: String },

    #[error("flag `{flag}`: {message}")]
    InvalidArg { flag: String, message: String },
}

/// Typed errors surfaced by the launcher core.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// Unknown command or subcommand. `available` is scoped to the search
    /// space the name was looked up in: every command for a top-level name,
    /// only the parent's children for a subcommand.
    #[error("{}", not_found_message(.name, .parent.as_deref(), .available, .suggestion.as_deref()))]
    CommandNotFound {
        name: String,
        parent: Option<String>,
        available: Vec<String>,
        suggestion: Option<String>,
    },

    #[error("{message}")]
    ArgumentValidation { message: String },

    #[error("failed to load command `{command}`: {source}")]
    CommandLoad {
        command: String,
        #[source]
        source: ModuleError,
    },

    #[error("cannot scan commands directory {}: {message}", root.display())]
    DiscoveryFailed { root: PathBuf, message: String },
}

impl LauncherError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LauncherError::CommandNotFound { .. } => ErrorCode::CommandNotFound,
            LauncherError::ArgumentValidation { .. } => ErrorCode::ArgumentValidation,
            LauncherError::CommandLoad { .. } => ErrorCode::CommandLoad,
            LauncherError::DiscoveryFailed { .. } => ErrorCode::DiscoveryFailed,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        LauncherError::ArgumentValidation {
            message: message.into(),
        }
    }

    pub(crate) fn load(command: impl Into<String>, source: ModuleError) -> Self {
        LauncherError::CommandLoad {
            command: command.into(),
            source,
        }
    }
}

fn not_found_message(
    name: &str,
    parent: Option<&str>,
    available: &[String],
    suggestion: Option<&str>,
) -> String {
    let mut message = match parent {
        Some(parent) => format!("unknown subcommand `{}` for `{}`", name, parent),
        None => format!("unknown command `{}`", name),
    };
    if let Some(suggestion) = suggestion {
        message.push_str(&format!(". Did you mean `{}`?", suggestion));
    }
    match (parent, available.is_empty()) {
        (Some(parent), true) => message.push_str(&format!("\n`{}` has no subcommands", parent)),
        (Some(_), false) => {
            message.push_str(&format!("\navailable subcommands: {}", available.join(", ")))
        }
        (None, true) => message.push_str("\nno commands are available"),
        (None, false) => {
            message.push_str(&format!("\navailable commands: {}", available.join(", ")))
        }
    }
    message
}
