// vinst/src/cli/list.rs
use clap::Args;
use colored::Colorize;
use vinst_common::error::Result;
use vinst_common::layout::StoreEntry;
use vinst_common::{Config, ReleaseSpec};
use vinst_core::Installer;

use crate::cli::print_current;

#[derive(Args, Debug)]
pub struct List {
    /// Also show archived and failed versions
    #[arg(long, short)]
    pub all: bool,
}

impl List {
    pub fn run(&self, spec: ReleaseSpec, config: Config) -> Result<()> {
        let installer = Installer::new(spec, config)?;
        let listing = installer.list()?;

        if listing.installed.is_empty() && listing.archived.is_empty() {
            println!("No versions of {} installed.", installer.spec().name);
            return Ok(());
        }

        println!("{}", "Installed".bold());
        for entry in &listing.installed {
            let active = listing.current.as_deref() == Some(entry.path.as_path());
            print_entry(entry, active);
        }

        if self.all && !listing.archived.is_empty() {
            println!("{}", "Archived".bold());
            for entry in &listing.archived {
                print_entry(entry, false);
            }
        } else if !listing.archived.is_empty() {
            println!(
                "{} archived version(s); use --all to show them",
                listing.archived.len()
            );
        }

        print_current(&installer.store())
    }
}

fn print_entry(entry: &StoreEntry, active: bool) {
    let marker = if active { "*".green().bold() } else { " ".normal() };
    let name = if entry.is_failed() {
        entry.name.red()
    } else {
        entry.name.normal()
    };
    println!("{marker} {name:<40} {}", entry.kind.label().dimmed());
}
