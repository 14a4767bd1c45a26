// vinst-core/src/install.rs
//! Sequences Fetch -> Verify -> Extract -> Deploy -> hooks, plus the
//! rollback, uninstall, prune and list operations over one release.
use std::path::PathBuf;

use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};
use vinst_common::config::Config;
use vinst_common::error::{Result, VinstError};
use vinst_common::layout::StoreEntry;
use vinst_common::manifest::ReleaseSpec;
use vinst_common::model::SourceArtifact;

use crate::checksum::verify_checksum;
use crate::extract::extract_release;
use crate::fetch::{DefaultFetcher, Fetcher};
use crate::hooks::{run_hooks, PostInstallContext, PostInstallHook};
use crate::preflight::check_required_apps;
use crate::signature::SignatureVerifier;
use crate::store::{InstallLock, RollbackOutcome, RollbackSelector, StoreListing, VersionStore};

pub const DEFAULT_KEEP: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOptions {
    pub auto_clean_archives: bool,
    pub keep: usize,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            auto_clean_archives: false,
            keep: DEFAULT_KEEP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: PathBuf,
    pub current_pointer: PathBuf,
    pub archived_previous: Option<PathBuf>,
    pub pruned: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

pub struct Installer<F = DefaultFetcher> {
    spec: ReleaseSpec,
    config: Config,
    fetcher: F,
    hooks: Vec<Box<dyn PostInstallHook>>,
}

impl Installer<DefaultFetcher> {
    pub fn new(spec: ReleaseSpec, config: Config) -> Result<Self> {
        let fetcher = DefaultFetcher::new(&config)?;
        Ok(Self::with_fetcher(spec, config, fetcher))
    }
}

impl<F: Fetcher> Installer<F> {
    pub fn with_fetcher(spec: ReleaseSpec, config: Config, fetcher: F) -> Self {
        Self {
            spec,
            config,
            fetcher,
            hooks: Vec::new(),
        }
    }

    pub fn add_hook(mut self, hook: Box<dyn PostInstallHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn spec(&self) -> &ReleaseSpec {
        &self.spec
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> VersionStore {
        VersionStore::new(self.config.install_root(), &self.spec.name)
    }

    #[instrument(skip_all, fields(app = %self.spec.name, version = %self.spec.version))]
    pub async fn install(&self, options: &InstallOptions) -> Result<InstallReport> {
        check_required_apps(&self.spec.required_apps)?;
        let store = self.store();
        store.current_target()?;

        let scratch = self.scratch_dir()?;
        debug!("Scratch workspace: {}", scratch.path().display());

        let artifact = self.fetcher.fetch(&self.spec.source, scratch.path()).await?;
        info!("Fetched {}", artifact.origin);
        self.verify_digest(&artifact)?;
        self.verify_signature(&artifact, &scratch).await?;

        let tree = extract_release(&artifact, scratch.path(), &self.spec)?;

        let lock = InstallLock::acquire(store.root(), self.config.lock_timeout).await?;
        let protocol = store.clone();
        let tree_root = tree.root().to_path_buf();
        let version = self.spec.version.clone();
        let options = *options;
        let outcome = run_blocking(move || {
            let mut outcome = protocol.deploy(&lock, &tree_root, &version)?;
            if options.auto_clean_archives {
                outcome.pruned = protocol.prune(&lock, options.keep)?;
            }
            Ok(outcome)
        })
        .await?;
        info!(
            "{} -> {}",
            store.pointer_path().display(),
            outcome.installed.display()
        );

        let pointer = store.pointer_path();
        run_hooks(
            &self.hooks,
            &PostInstallContext {
                spec: &self.spec,
                install_dir: &outcome.installed,
                current_pointer: &pointer,
            },
        )
        .await?;

        Ok(InstallReport {
            installed: outcome.installed,
            current_pointer: pointer,
            archived_previous: outcome.archived_previous,
            pruned: outcome.pruned,
            warnings: tree.warnings,
        })
    }

    pub fn rollback_candidates(&self) -> Result<Vec<StoreEntry>> {
        self.store().rollback_candidates()
    }

    #[instrument(skip(self), fields(app = %self.spec.name))]
    pub async fn rollback(&self, selector: &RollbackSelector) -> Result<RollbackOutcome> {
        let store = self.store();
        let Some(lock) = self.lock_existing(&store).await? else {
            return Err(VinstError::NoSuchVersion(format!(
                "nothing installed under {}",
                store.root().display()
            )));
        };
        let selector = selector.clone();
        run_blocking(move || store.rollback(&lock, &selector)).await
    }

    /// Removes this release's version, or with `remove_all` every entry of the app.
    #[instrument(skip(self), fields(app = %self.spec.name, version = %self.spec.version))]
    pub async fn uninstall(&self, remove_all: bool) -> Result<Vec<PathBuf>> {
        let store = self.store();
        let Some(lock) = self.lock_existing(&store).await? else {
            if remove_all {
                return Ok(Vec::new());
            }
            return Err(VinstError::NoSuchVersion(format!(
                "{} is not installed",
                store.version_dir(&self.spec.version).display()
            )));
        };
        let version = self.spec.version.clone();
        run_blocking(move || {
            if remove_all {
                store.remove_all(&lock)
            } else {
                store.uninstall(&lock, &version).map(|p| vec![p])
            }
        })
        .await
    }

    pub async fn prune(&self, keep: usize) -> Result<Vec<PathBuf>> {
        let store = self.store();
        let lock = self.lock_existing(&store).await?;
        match lock {
            Some(lock) => run_blocking(move || store.prune(&lock, keep)).await,
            None => Ok(Vec::new()),
        }
    }

    pub fn list(&self) -> Result<StoreListing> {
        self.store().list()
    }

    /// Locks the root only if it already exists, so read-mostly commands
    /// never create an empty install root.
    async fn lock_existing(&self, store: &VersionStore) -> Result<Option<InstallLock>> {
        if !store.root().is_dir() {
            return Ok(None);
        }
        InstallLock::acquire(store.root(), self.config.lock_timeout)
            .await
            .map(Some)
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("vinst-");
        let dir = match &self.config.scratch_parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    fn verify_digest(&self, artifact: &SourceArtifact) -> Result<()> {
        let expected = self
            .spec
            .source
            .sha256
            .as_deref()
            .or(artifact.advertised_sha256.as_deref());
        match expected {
            Some(digest) => {
                verify_checksum(artifact.path(), digest)?;
                info!("Checksum OK");
                Ok(())
            }
            None => {
                warn!(
                    "No SHA-256 digest configured or advertised for {}; skipping integrity check",
                    artifact.origin
                );
                Ok(())
            }
        }
    }

    async fn verify_signature(&self, artifact: &SourceArtifact, scratch: &TempDir) -> Result<()> {
        let source = &self.spec.source;
        if !source.requires_signature() {
            return Ok(());
        }
        let Some(signature_ref) = source.gpg_signature.as_deref() else {
            return Err(VinstError::SignatureMissing(
                "gpg_key is configured but gpg_signature is not; cannot verify without a detached signature"
                    .to_string(),
            ));
        };
        let verifier = SignatureVerifier::locate(self.config.signing_tool.as_deref())?;
        let signature = self
            .fetcher
            .fetch_reference(signature_ref, scratch.path())
            .await?;
        let key = match source.gpg_key.as_deref() {
            Some(key_ref) => Some(self.fetcher.fetch_reference(key_ref, scratch.path()).await?),
            None => None,
        };
        verifier
            .verify(artifact.path(), Some(&signature), key.as_deref())
            .await?;
        info!("GPG signature valid");
        Ok(())
    }
}

/// Runs a store protocol off the async runtime; the lock moves in with it and
/// is released when the protocol returns.
async fn run_blocking<T, Op>(op: Op) -> Result<T>
where
    Op: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| VinstError::Generic(format!("store task failed: {e}")))?
}
