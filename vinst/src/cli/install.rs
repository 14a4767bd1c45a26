// vinst/src/cli/install.rs
use std::io::IsTerminal;

use clap::Args;
use colored::Colorize;
use dialoguer::Confirm;
use tracing::{info, warn};
use vinst_common::error::Result;
use vinst_common::{Config, ReleaseSpec};
use vinst_core::{DefaultFetcher, InstallOptions, Installer, VenvHook, DEFAULT_KEEP};

use crate::cli::{header, print_current, prompt_error};

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Prune archived versions beyond --keep after deploying
    #[arg(long)]
    pub auto_clean_archives: bool,

    /// Number of retired versions to keep when auto-cleaning
    #[arg(long, default_value_t = DEFAULT_KEEP, value_name = "N")]
    pub keep: usize,
}

impl InstallArgs {
    pub async fn run(&self, spec: ReleaseSpec, config: Config, assume_yes: bool) -> Result<()> {
        let root = config.install_root().to_path_buf();
        let venv = if spec.aux.setup_venv {
            Some(VenvHook::locate(config.python.as_deref())?)
        } else {
            None
        };
        if !assume_yes {
            let proceed = Confirm::new()
                .with_prompt(format!(
                    "Install {} {} into {}?",
                    spec.name,
                    spec.version,
                    root.display()
                ))
                .default(true)
                .interact()
                .map_err(prompt_error)?;
            if !proceed {
                println!("Aborted; nothing was changed.");
                return Ok(());
            }
        }

        header(&format!("Installing {} {}", spec.name, spec.version));
        let fetcher = DefaultFetcher::new(&config)?.with_progress(std::io::stderr().is_terminal());
        let mut installer = Installer::with_fetcher(spec, config, fetcher);
        if let Some(venv) = venv {
            installer = installer.add_hook(Box::new(venv));
        }
        let options = InstallOptions {
            auto_clean_archives: self.auto_clean_archives,
            keep: self.keep,
        };
        let report = installer.install(&options).await?;

        for warning in &report.warnings {
            warn!("{}", warning);
        }
        if let Some(previous) = &report.archived_previous {
            info!("Previous copy archived to {}", previous.display());
        }
        for removed in &report.pruned {
            println!("{} {}", "Pruned".yellow(), removed.display());
        }
        println!(
            "{} {}",
            "✓ Installed".green().bold(),
            report.installed.display()
        );
        print_current(&installer.store())
    }
}
