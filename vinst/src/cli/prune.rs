// vinst/src/cli/prune.rs
use clap::Args;
use colored::Colorize;
use vinst_common::error::Result;
use vinst_common::{Config, ReleaseSpec};
use vinst_core::{Installer, DEFAULT_KEEP};

use crate::cli::{header, print_current};

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Number of retired versions to keep
    #[arg(long, default_value_t = DEFAULT_KEEP, value_name = "N")]
    pub keep: usize,
}

impl PruneArgs {
    pub async fn run(&self, spec: ReleaseSpec, config: Config) -> Result<()> {
        let installer = Installer::new(spec, config)?;
        header(&format!(
            "Pruning {} (keeping {})",
            installer.spec().name,
            self.keep
        ));
        let removed = installer.prune(self.keep).await?;
        if removed.is_empty() {
            println!("Nothing to prune.");
        }
        for path in &removed {
            println!("{} {}", "Pruned".yellow(), path.display());
        }
        print_current(&installer.store())
    }
}
