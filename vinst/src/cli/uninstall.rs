// vinst/src/cli/uninstall.rs
use clap::Args;
use colored::Colorize;
use dialoguer::Confirm;
use vinst_common::error::Result;
use vinst_common::{Config, ReleaseSpec};
use vinst_core::Installer;

use crate::cli::{header, print_current, prompt_error};

#[derive(Args, Debug)]
pub struct Uninstall {
    /// Remove every installed and archived version plus the current pointer
    #[arg(long)]
    pub remove_all: bool,
}

impl Uninstall {
    pub async fn run(&self, spec: ReleaseSpec, config: Config, assume_yes: bool) -> Result<()> {
        let installer = Installer::new(spec, config)?;
        let spec = installer.spec();
        let what = if self.remove_all {
            format!("every version of {}", spec.name)
        } else {
            format!("{} {}", spec.name, spec.version)
        };

        if self.remove_all && !assume_yes {
            let proceed = Confirm::new()
                .with_prompt(format!(
                    "Remove {} from {}?",
                    what,
                    installer.config().install_root().display()
                ))
                .default(false)
                .interact()
                .map_err(prompt_error)?;
            if !proceed {
                println!("Aborted; nothing was changed.");
                return Ok(());
            }
        }

        header(&format!("Uninstalling {what}"));
        let removed = installer.uninstall(self.remove_all).await?;
        if removed.is_empty() {
            println!("Nothing to remove.");
        }
        for path in &removed {
            println!("{} {}", "✓ Removed".green(), path.display());
        }
        if installer.config().install_root().is_dir() {
            print_current(&installer.store())?;
        }
        Ok(())
    }
}
