pub mod cli;
pub mod config;
pub mod git;
pub mod lock;
pub mod mirror;
pub mod sync;

#[cfg(test)]
mod testutil;

use std::io;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::git::SystemRunner;
use crate::sync::{SyncError, SyncOutcome, Syncer};

const DEFAULT_REMOTE: &str = "origin";
const DEFAULT_BRANCH: &str = "main";

#[derive(Parser)]
#[command(
    name = "sitesync",
    about = "Mirror a generated site into a git working copy and publish it"
)]
struct Cli {
    /// Config file (defaults to $SITESYNC_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the source directory, commit and push
    Sync,

    /// Show the state of the working copy against its remote
    Status {
        /// Working copy to inspect instead of the configured one
        #[arg(long, value_name = "PATH")]
        repo: Option<PathBuf>,
    },

    /// Check dependencies and configuration
    Doctor,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("sitesync=info"))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Sync => cmd_sync(config_path),
        Commands::Status { repo } => cmd_status(config_path, repo.as_deref()),
        Commands::Doctor => cmd_doctor(config_path),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let code = e
            .downcast_ref::<SyncError>()
            .map(SyncError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn cmd_sync(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(config_path)?;

    match Syncer::new(&config, &SystemRunner).run()? {
        SyncOutcome::NoChanges { stats } => {
            println!(
                "No changes to publish ({} file(s) checked).",
                stats.unchanged
            );
        }
        SyncOutcome::Published {
            commit,
            message,
            stats,
        } => {
            println!(
                "Published {} to {}: {}",
                &commit[..commit.len().min(7)],
                config.upstream(),
                message
            );
            println!(
                "  {} copied, {} deleted, {} unchanged",
                stats.copied, stats.deleted, stats.unchanged
            );
        }
    }

    Ok(())
}

fn cmd_status(
    config_path: Option<&Path>,
    repo: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (repo_dir, remote, branch) = match (Config::load(config_path), repo) {
        (Ok(config), Some(repo)) => (repo.to_path_buf(), config.remote, config.branch),
        (Ok(config), None) => (config.repo_dir, config.remote, config.branch),
        (Err(e), Some(repo)) => {
            log::debug!("no usable config ({}), using {}/{}", e, DEFAULT_REMOTE, DEFAULT_BRANCH);
            (
                repo.to_path_buf(),
                DEFAULT_REMOTE.to_string(),
                DEFAULT_BRANCH.to_string(),
            )
        }
        (Err(e), None) => return Err(e.into()),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    cli::print_status(&mut out, &SystemRunner, &repo_dir, &remote, &branch)
}

fn cmd_doctor(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(config_path)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if !cli::run_doctor(&mut out, &SystemRunner, &config)? {
        std::process::exit(1);
    }

    Ok(())
}
