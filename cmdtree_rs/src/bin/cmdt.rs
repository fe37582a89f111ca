use std::any::Any;
use std::panic;
use std::path::Path;
use std::sync::Arc;

use cmdtree::builtins::builtin_bindings;
use cmdtree::{CmdtreeConfig, Discovery, LaunchOptions, Launcher, TomlModuleLoader};

const LOG_ENV: &str = "CMDT_LOG";

fn install_broken_pipe_handler() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let is_broken = <dyn Any>::downcast_ref::<&str>(payload)
            .is_some_and(|s| s.contains("Broken pipe"))
            || <dyn Any>::downcast_ref::<String>(payload)
                .is_some_and(|s| s.contains("Broken pipe"));

        if is_broken {
            // Quietly exit when downstream closes the pipe (e.g. piping to `head`).
            std::process::exit(0);
        }

        default_hook(info);
    }));
}

fn init_tracing() {
    // Logs go to stderr, stdout carries help text and handler output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

async fn clear_cache(config: &CmdtreeConfig) -> anyhow::Result<i32> {
    match config.metadata_cache() {
        Some(cache) => {
            cache.clear().await?;
            println!("cleared metadata cache at {}", cache.path().display());
        }
        None => println!("metadata cache is disabled"),
    }
    Ok(0)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    install_broken_pipe_handler();
    init_tracing();

    let base_dir = std::env::current_dir()?;
    let config = CmdtreeConfig::load(&base_dir);
    // nosemgrep: rust.lang.security.args.args
    let argv: Vec<String> = std::env::args().skip(1).collect();

    if argv.first().map(String::as_str) == Some("--clear-cache") {
        let code = clear_cache(&config).await?;
        std::process::exit(code);
    }

    let loader = Arc::new(TomlModuleLoader::new(builtin_bindings()));
    let mut discovery = Discovery::new(&config.commands_dir, Path::new(&base_dir), loader)
        .with_options(config.discovery_options());
    if let Some(cache) = config.metadata_cache() {
        discovery = discovery.with_cache(cache);
    }

    let mut options = LaunchOptions::new("cmdt", env!("CARGO_PKG_VERSION"));
    options.metadata_concurrency = config.concurrency.metadata.max(1);
    let launcher = Launcher::new(discovery, options);

    let result = launcher.run(&argv).await;
    launcher.settle().await;

    let code = result?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
