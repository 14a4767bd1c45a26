// vinst-core/src/venv.rs
//! Post-install hook that gives a Python release its own virtualenv.
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::process::Command;
use tracing::{debug, error, info};
use vinst_common::error::{Result, VinstError};

use crate::hooks::{PostInstallContext, PostInstallHook};

pub const VENV_DIR_NAME: &str = "venv";

const PYTHON_CANDIDATES: [&str; 2] = ["python3", "python"];

/// Creates `<install_dir>/venv` and installs `requirements.txt` into it when
/// the release ships one.
#[derive(Debug, Clone)]
pub struct VenvHook {
    python: PathBuf,
}

impl VenvHook {
    /// Uses `configured` when given, otherwise the first of `python3`/`python` on PATH.
    pub fn locate(configured: Option<&Path>) -> Result<Self> {
        if let Some(python) = configured {
            let resolved = which::which(python).map_err(|e| {
                VinstError::Config(format!(
                    "configured python {} not usable: {e}",
                    python.display()
                ))
            })?;
            return Ok(Self::with_python(resolved));
        }
        PYTHON_CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Self::with_python)
            .ok_or_else(|| {
                VinstError::Config(
                    "setup_venv is enabled but no python3 was found on PATH (set VINST_PYTHON or setup_venv = false)"
                        .to_string(),
                )
            })
    }

    pub fn with_python(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }

    async fn create(&self, install_dir: &Path) -> Result<PathBuf> {
        let venv = install_dir.join(VENV_DIR_NAME);
        info!("Creating virtualenv {}", venv.display());
        run_tool(
            &self.python,
            &[OsStr::new("-m"), OsStr::new("venv"), venv.as_os_str()],
            install_dir,
        )
        .await?;

        let requirements = install_dir.join(vinst_common::manifest::DEFAULT_OPTIONAL_MANIFEST);
        if requirements.is_file() {
            let pip = pip_path(&venv);
            info!("Installing {}", requirements.display());
            run_tool(
                &pip,
                &[OsStr::new("install"), OsStr::new("--upgrade"), OsStr::new("pip")],
                install_dir,
            )
            .await?;
            run_tool(
                &pip,
                &[OsStr::new("install"), OsStr::new("-r"), requirements.as_os_str()],
                install_dir,
            )
            .await?;
        } else {
            debug!("No {} in {}", requirements.display(), install_dir.display());
        }
        Ok(venv)
    }
}

impl PostInstallHook for VenvHook {
    fn name(&self) -> &str {
        "venv"
    }

    fn run<'a>(&'a self, ctx: &'a PostInstallContext<'a>) -> BoxFuture<'a, Result<()>> {
        async move {
            self.create(ctx.install_dir).await?;
            Ok(())
        }
        .boxed()
    }
}

#[cfg(unix)]
fn pip_path(venv: &Path) -> PathBuf {
    venv.join("bin").join("pip")
}

#[cfg(windows)]
fn pip_path(venv: &Path) -> PathBuf {
    venv.join("Scripts").join("pip.exe")
}

async fn run_tool(program: &Path, args: &[&OsStr], cwd: &Path) -> Result<()> {
    debug!("Running {} {:?}", program.display(), args);
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| VinstError::Generic(format!("failed to execute {}: {e}", program.display())))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("{} exited with {}: {}", program.display(), output.status, stderr.trim());
        return Err(VinstError::Generic(format!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}
