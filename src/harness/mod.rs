pub mod context;
pub mod exec;
pub mod output;
pub mod registry;
pub mod report;
pub mod teardown;

use std::io;
use std::path::PathBuf;

use crate::checks;
use crate::config::HarnessConfig;
use crate::utils::{HarnessError, Result};
use context::RunContext;
use registry::{Check, Registry, Selection};

/// Resolved `run` arguments.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub config: Option<PathBuf>,
    pub arch: String,
    pub user: String,
    pub scopes: Vec<String>,
    pub name: Option<String>,
    pub output: String,
    pub verbose: bool,
}

fn registry() -> Result<Registry> {
    let mut reg = Registry::new();
    checks::register_all(&mut reg)?;
    Ok(reg)
}

/// Run the selected diagnostics and render the report. Returns the process
/// exit code the run earned.
pub fn run_diagnostics(opts: RunOptions) -> Result<i32> {
    let config = HarnessConfig::load(opts.config.as_deref())?;
    let ctx = RunContext::new(opts.root, opts.arch, opts.user, config)?;
    let registry = registry()?;

    teardown::install_interrupt_handler(ctx.teardowns().clone(), ctx.exec().clone())
        .map_err(|e| HarnessError::Configuration(format!("cannot install interrupt handler: {}", e)))?;

    eprintln!(
        "Running {} checks on {} (image {}, {})...",
        registry.len(),
        ctx.root.display(),
        ctx.version,
        ctx.arch
    );
    let selection = Selection { scopes: opts.scopes, name: opts.name };
    let filter = |c: &Check| selection.matches(c);
    let summary = registry.run(&ctx, Some(&filter));

    // Guards normally drain this already
    if !ctx.teardowns().is_empty() {
        tracing::warn!("running teardowns left behind by finished checks");
        ctx.teardowns().run_all(ctx.exec());
    }

    output::display(&summary, &opts.output, opts.verbose)?;
    Ok(summary.exit_code())
}

/// Print every registered check grouped by category.
pub fn list_checks() -> Result<()> {
    let registry = registry()?;
    if registry.is_empty() {
        eprintln!("No checks registered.");
        return Ok(());
    }
    let stdout = io::stdout();
    output::display_checks(registry.checks(), &mut stdout.lock())?;
    Ok(())
}
