//! Handlers and validators the `cmdt` binary registers for entry files.
//!
//! | name            | kind      | behavior                                   |
//! |-----------------|-----------|--------------------------------------------|
//! | `print-args`    | handler   | prints the invocation as pretty JSON       |
//! | `noop`          | handler   | does nothing                               |
//! | `non-empty`     | validator | rejects empty strings                      |
//! | `port`          | validator | integer in `1..=65535`                     |
//! | `existing-path` | validator | path must exist                            |

use std::path::Path;

use crate::module::Bindings;
use crate::schema::{ArgValue, Invocation, handler, validator};

pub fn builtin_bindings() -> Bindings {
    Bindings::new()
        .with_handler("print-args", handler(|invocation| async move { print_args(&invocation) }))
        .with_handler("noop", handler(|_| async { Ok(()) }))
        .with_validator("non-empty", validator(non_empty))
        .with_validator("port", validator(port))
        .with_validator("existing-path", validator(existing_path))
}

fn print_args(invocation: &Invocation) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(invocation)?);
    Ok(())
}

fn non_empty(value: &ArgValue) -> Result<(), String> {
    match value.as_str() {
        Some(s) if s.trim().is_empty() => Err("value must not be empty".to_string()),
        _ => Ok(()),
    }
}

fn port(value: &ArgValue) -> Result<(), String> {
    match value.as_f64() {
        Some(n) if n.fract() == 0.0 && (1.0..=65535.0).contains(&n) => Ok(()),
        _ => Err(format!("`{}` is not a valid port (1-65535)", value)),
    }
}

fn existing_path(value: &ArgValue) -> Result<(), String> {
    let path = value.to_string();
    if Path::new(&path).exists() {
        Ok(())
    } else {
        Err(format!("path `{}` does not exist", path))
    }
}
