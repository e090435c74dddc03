use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "agrodiag")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_TIME"), ")"))]
#[command(about = "Deployment diagnostics for the agricultural vehicle compute appliance", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the diagnostics against a deployed version
    Run {
        /// Deployment root (defaults to the directory above the binary's)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Harness configuration file (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Architecture to diagnose as (defaults to the host's)
        #[arg(long)]
        arch: Option<String>,

        /// Operator account (defaults to $USER)
        #[arg(short, long)]
        user: Option<String>,

        /// Scope to run: all, aarch64, x86_64 or a group such as stand (repeatable)
        #[arg(short, long = "scope")]
        scopes: Vec<String>,

        /// Only run checks whose name contains this
        #[arg(short, long)]
        name: Option<String>,

        /// Output format (text or json)
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        output: String,

        /// Show full failure messages and info-level logs
        #[arg(short, long)]
        verbose: bool,
    },

    /// List registered checks
    List,
}
