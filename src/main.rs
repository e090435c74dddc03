mod checks;
mod cli;
mod config;
mod harness;
mod kv;
mod parse;
mod utils;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use harness::RunOptions;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    init_logging(verbose);

    let result = match cli.command {
        Commands::Run { root, config, arch, user, scopes, name, output, verbose } => {
            resolve_options(root, config, arch, user, scopes, name, output, verbose).and_then(|opts| {
                harness::run_diagnostics(opts).context("diagnostics could not run")
            })
        }
        Commands::List => harness::list_checks().map(|_| 0).context("cannot list checks"),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[allow(clippy::too_many_arguments)]
fn resolve_options(
    root: Option<PathBuf>,
    config: Option<PathBuf>,
    arch: Option<String>,
    user: Option<String>,
    scopes: Vec<String>,
    name: Option<String>,
    output: String,
    verbose: bool,
) -> anyhow::Result<RunOptions> {
    let root = match root {
        Some(r) => r,
        None => default_root().context("cannot locate the deployment root, pass --root")?,
    };
    let arch = arch.unwrap_or_else(|| std::env::consts::ARCH.to_string());
    let user = match user {
        Some(u) => u,
        None => std::env::var("USER").context("USER is not set, pass --user")?,
    };
    let scopes = if scopes.is_empty() { vec!["all".to_string(), arch.clone()] } else { scopes };

    Ok(RunOptions { root, config, arch, user, scopes, name, output, verbose })
}

/// The binary ships in `<root>/scripts/` (or `<root>/bin/`).
fn default_root() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe()?.canonicalize()?;
    match exe.parent().and_then(|dir| dir.parent()) {
        Some(root) => Ok(root.to_path_buf()),
        None => Ok(std::env::current_dir()?),
    }
}
