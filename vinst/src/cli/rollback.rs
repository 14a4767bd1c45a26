// vinst/src/cli/rollback.rs
use clap::Args;
use colored::Colorize;
use dialoguer::Select;
use vinst_common::error::{Result, VinstError};
use vinst_common::layout::StoreEntry;
use vinst_common::{Config, ReleaseSpec};
use vinst_core::{Installer, RollbackSelector};

use crate::cli::{header, print_current, prompt_error};

#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Candidate index (0 = newest) or version to activate
    #[arg(long = "to", value_name = "INDEX|VERSION")]
    pub target: Option<String>,
}

impl RollbackArgs {
    pub async fn run(&self, spec: ReleaseSpec, config: Config, assume_yes: bool) -> Result<()> {
        let installer = Installer::new(spec, config)?;
        let selector = match &self.target {
            Some(raw) => RollbackSelector::parse(raw),
            None => {
                let candidates = installer.rollback_candidates()?;
                if candidates.is_empty() {
                    return Err(VinstError::NoSuchVersion(format!(
                        "no previous versions of {} to roll back to",
                        installer.spec().name
                    )));
                }
                if assume_yes {
                    RollbackSelector::Index(0)
                } else {
                    match choose(&candidates)? {
                        Some(index) => RollbackSelector::Index(index),
                        None => {
                            println!("Aborted; nothing was changed.");
                            return Ok(());
                        }
                    }
                }
            }
        };

        header(&format!("Rolling back {}", installer.spec().name));
        let outcome = installer.rollback(&selector).await?;
        if let Some(retired) = &outcome.retired {
            println!("{} {}", "Retired".yellow(), retired.display());
        }
        print_current(&installer.store())
    }
}

fn choose(candidates: &[StoreEntry]) -> Result<Option<usize>> {
    let items: Vec<String> = candidates
        .iter()
        .map(|entry| format!("{} ({})", entry.name, entry.kind.label()))
        .collect();
    Select::new()
        .with_prompt("Select the version to activate")
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(prompt_error)
}
