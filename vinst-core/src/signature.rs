// vinst-core/src/signature.rs
//! Detached-signature verification through an external OpenPGP tool.
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, error};
use vinst_common::error::{Result, VinstError};

const TOOL_CANDIDATES: [&str; 2] = ["gpg", "gpg2"];

#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    tool: PathBuf,
}

impl SignatureVerifier {
    /// Uses `configured` when given, otherwise the first of `gpg`/`gpg2` on PATH.
    pub fn locate(configured: Option<&Path>) -> Result<Self> {
        if let Some(tool) = configured {
            let resolved = which::which(tool).map_err(|e| {
                VinstError::SigningToolUnavailable(format!(
                    "configured signing tool {} not usable: {e}",
                    tool.display()
                ))
            })?;
            return Ok(Self::with_tool(resolved));
        }
        TOOL_CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Self::with_tool)
            .ok_or_else(|| {
                VinstError::SigningToolUnavailable(
                    "neither gpg nor gpg2 found on PATH; cannot verify signature".to_string(),
                )
            })
    }

    pub fn with_tool(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    /// Verifies `signature` over `artifact`, trusting only `public_key` (if given).
    ///
    /// Each call gets its own throwaway keyring directory, handed to the tool
    /// through `--homedir` and the child's `GNUPGHOME`.
    pub async fn verify(
        &self,
        artifact: &Path,
        signature: Option<&Path>,
        public_key: Option<&Path>,
    ) -> Result<()> {
        let signature = signature.ok_or_else(|| {
            VinstError::SignatureMissing(
                "a public key is configured but no detached signature (gpg_signature) was provided"
                    .to_string(),
            )
        })?;

        let trust_store = scoped_trust_store()?;
        let homedir = trust_store.path();
        debug!(
            "Verifying {} against {} using {} (trust store {})",
            artifact.display(),
            signature.display(),
            self.tool.display(),
            homedir.display()
        );

        if let Some(key) = public_key {
            let output = self
                .run(homedir, &[OsStr::new("--import"), key.as_os_str()])
                .await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                error!("Public key import failed: {}", stderr.trim());
                return Err(VinstError::SignatureInvalid(format!(
                    "failed to import public key {}: {}",
                    key.display(),
                    stderr.trim()
                )));
            }
            debug!("Imported public key {}", key.display());
        }

        let output = self
            .run(
                homedir,
                &[
                    OsStr::new("--verify"),
                    signature.as_os_str(),
                    artifact.as_os_str(),
                ],
            )
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Signature verification failed: {}", stderr.trim());
            return Err(VinstError::SignatureInvalid(format!(
                "signature {} does not verify {}: {}",
                signature.display(),
                artifact.display(),
                stderr.trim()
            )));
        }
        debug!("Signature valid for {}", artifact.display());
        Ok(())
    }

    async fn run(&self, homedir: &Path, args: &[&OsStr]) -> Result<Output> {
        let mut cmd = Command::new(&self.tool);
        cmd.arg("--homedir")
            .arg(homedir)
            .arg("--batch")
            .args(args)
            .env("GNUPGHOME", homedir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.output().await.map_err(|e| {
            VinstError::SigningToolUnavailable(format!(
                "failed to execute {}: {e}",
                self.tool.display()
            ))
        })
    }
}

fn scoped_trust_store() -> Result<TempDir> {
    let dir = tempfile::Builder::new().prefix("vinst-gnupg-").tempdir()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(dir)
}
