//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Beaver - incremental content-addressed builds
///
/// Rebuilds exactly the transformations whose input or output contents
/// changed since their last successful run.
#[derive(Parser, Debug)]
#[command(name = "beaver")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BEAVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .beaver.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,

    /// Build root (defaults to the current directory)
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bring targets up to date
    Build(BuildArgs),

    /// List declared artifacts
    List(ListArgs),

    /// Drop staleness records so targets rebuild
    Forget(ForgetArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Artifacts to build (regular expressions, anchored at the start)
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Maximum parallel transformations (default: config, then CPU count)
    #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: Option<u16>,

    /// Report what would run without running anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Stop scheduling new work after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Build manifest (default: beaver.toml in the build root)
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Staleness store (default: .beaverdigests in the build root)
    #[arg(long, value_name = "PATH")]
    pub digest_file: Option<PathBuf>,

    /// Additional environment variables for commands (KEY=VALUE)
    #[arg(short, long, value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// Output format for the final report
    #[arg(long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only artifacts matching these patterns
    pub patterns: Vec<String>,

    /// Build manifest (default: beaver.toml in the build root)
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the forget command
#[derive(Parser, Debug)]
#[command(group(clap::ArgGroup::new("what").required(true).args(["targets", "all"])))]
pub struct ForgetArgs {
    /// Artifacts whose producing transformations should rebuild
    pub targets: Vec<String>,

    /// Clear every record
    #[arg(long)]
    pub all: bool,

    /// Build manifest (default: beaver.toml in the build root)
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Staleness store (default: .beaverdigests in the build root)
    #[arg(long, value_name = "PATH")]
    pub digest_file: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., build.concurrency, env.LANG)
        key: String,
        /// Value to set
        value: String,
        /// Write to project-local .beaver.toml instead of global config
        #[arg(long)]
        local: bool,
    },
}

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: Shell,
}

/// Output format for list and build reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Parse environment variable in KEY=VALUE format
fn parse_env_var(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE format: empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
