//! Beaver - incremental build orchestrator
//!
//! CLI entry point that dispatches to subcommands.

use beaver::cli::commands::{self, Project};
use beaver::cli::{Cli, Commands};
use beaver::config::{Config, ConfigManager};
use beaver::error::{BeaverError, BeaverResult};
use clap::Parser;
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> BeaverResult<ExitCode> {
    let cli = Cli::parse();

    // Completions need neither config nor a build root
    if let Commands::Completions(args) = cli.command {
        commands::completions(args)?;
        return Ok(ExitCode::SUCCESS);
    }

    let root = build_root(cli.directory.as_ref())?;

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    let local_config_path = if cli.no_local {
        None
    } else {
        ConfigManager::find_local_config(&root)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_tracing(cli.verbose, &config);
    if cli.no_local {
        debug!("Local config discovery disabled (--no-local)");
    } else if let Some(ref path) = local_config_path {
        debug!("Found local config: {}", path.display());
    }

    let project = Project::new(root, config);

    match cli.command {
        Commands::Completions(_) => unreachable!("Completions handled above"),
        Commands::Build(args) => {
            let cancel = CancellationToken::new();
            spawn_interrupt_handler(cancel.clone());
            commands::build(args, &project, cancel).await
        }
        Commands::List(args) => commands::list(args, &project).await.map(|()| ExitCode::SUCCESS),
        Commands::Forget(args) => commands::forget(args, &project)
            .await
            .map(|()| ExitCode::SUCCESS),
        Commands::Config(args) => commands::config(args, &config_manager, &project)
            .await
            .map(|()| ExitCode::SUCCESS),
    }
}

/// Absolute build root: `-C DIR` relative to the current directory, or the current directory
fn build_root(directory: Option<&PathBuf>) -> BeaverResult<PathBuf> {
    let cwd =
        std::env::current_dir().map_err(|e| BeaverError::io("getting current directory", e))?;
    let root = match directory {
        Some(dir) => cwd.join(dir),
        None => cwd,
    };
    if !root.is_dir() {
        return Err(BeaverError::User(format!(
            "Build root {} is not a directory",
            root.display()
        )));
    }
    Ok(root)
}

/// Initialize logging: 0 = warn, 1 = info, 2+ = debug; RUST_LOG overrides
fn init_tracing(verbose: u8, config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("beaver=warn"),
        1 => EnvFilter::new("beaver=info"),
        _ => EnvFilter::new("beaver=debug"),
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

/// Cancel the build on Ctrl-C; a second Ctrl-C exits immediately
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, cancelling running transformations");
        eprintln!("{} cancelling build (Ctrl-C again to abort)", style("!").yellow());
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}
