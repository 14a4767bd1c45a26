// vinst-core/src/lib.rs

pub mod checksum;
pub mod extract;
pub mod fetch;
pub mod hooks;
pub mod install;
pub mod preflight;
pub mod signature;
pub mod store;
pub mod venv;

// Re-export key types for easier use by the CLI crate
pub use fetch::{DefaultFetcher, Fetcher};
pub use hooks::{PostInstallContext, PostInstallHook};
pub use install::{InstallOptions, InstallReport, Installer, DEFAULT_KEEP};
pub use signature::SignatureVerifier;
pub use store::{
    DeployOutcome, InstallLock, RollbackOutcome, RollbackSelector, StoreListing, VersionStore,
};
pub use venv::VenvHook;
