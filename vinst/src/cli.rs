// vinst/src/cli.rs
//! Defines the command-line argument structure using clap.
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use vinst_common::error::{Result, VinstError};
use vinst_common::{Config, ReleaseSpec};
use vinst_core::VersionStore;

pub mod install;
pub mod list;
pub mod prune;
pub mod rollback;
pub mod uninstall;

use crate::cli::install::InstallArgs;
use crate::cli::list::List;
use crate::cli::prune::PruneArgs;
use crate::cli::rollback::RollbackArgs;
use crate::cli::uninstall::Uninstall;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "vinst", bin_name = "vinst")]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Release manifest (TOML) describing the application and its source
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the install root from the manifest
    #[arg(long, global = true, value_name = "DIR")]
    pub install_root: Option<PathBuf>,

    /// Answer yes to every prompt
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Install(InstallArgs),
    Uninstall(Uninstall),
    Rollback(RollbackArgs),
    Prune(PruneArgs),
    List(List),
}

impl Command {
    pub async fn run(&self, spec: ReleaseSpec, config: Config, assume_yes: bool) -> Result<()> {
        match self {
            Self::Install(command) => command.run(spec, config, assume_yes).await,
            Self::Uninstall(command) => command.run(spec, config, assume_yes).await,
            Self::Rollback(command) => command.run(spec, config, assume_yes).await,
            Self::Prune(command) => command.run(spec, config).await,
            Self::List(command) => command.run(spec, config),
        }
    }
}

pub(crate) fn header(message: &str) {
    println!("{}{}", "==> ".bold().blue(), message.bold());
}

pub(crate) fn prompt_error(e: dialoguer::Error) -> VinstError {
    VinstError::Generic(format!(
        "interactive prompt failed ({e}); pass --yes when not running in a terminal"
    ))
}

/// Prints where the `current` pointer ends up after a command.
pub(crate) fn print_current(store: &VersionStore) -> Result<()> {
    match store.current_target()? {
        Some(target) => {
            println!(
                "{} {} -> {}",
                "current:".green().bold(),
                store.pointer_path().display(),
                target.display()
            );
        }
        None => println!("{} none", "current:".yellow().bold()),
    }
    Ok(())
}
