// vinst-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::{ProjectDirs, UserDirs};
use tracing::debug;

use super::error::{Result, VinstError};
use super::manifest::ReleaseSpec;

const DEFAULT_RELEASE_API_BASE: &str = "https://api.github.com";
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub install_root: PathBuf,
    pub release_api_base: String,
    pub github_api_token: Option<String>,
    /// Explicit signing tool; `None` means look up `gpg`/`gpg2` on PATH.
    pub signing_tool: Option<PathBuf>,
    /// Interpreter used to create the release's virtualenv; `None` means look
    /// up `python3`/`python` on PATH.
    pub python: Option<PathBuf>,
    /// Parent directory for per-run scratch workspaces; `None` uses the system temp dir.
    pub scratch_parent: Option<PathBuf>,
    pub allow_insecure_http: bool,
    pub lock_timeout: Duration,
}

impl Config {
    /// Builds a configuration with defaults for everything except the install root.
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            release_api_base: DEFAULT_RELEASE_API_BASE.to_string(),
            github_api_token: None,
            signing_tool: None,
            python: None,
            scratch_parent: None,
            allow_insecure_http: false,
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
        }
    }

    /// Resolves the effective configuration for one run.
    ///
    /// Install root precedence: `install_root_override`, the manifest's
    /// `default_install_root`, then `~/.local/share/{name}-installs`.
    pub fn load(spec: &ReleaseSpec, install_root_override: Option<&Path>) -> Result<Self> {
        debug!("Loading vinst configuration for '{}'", spec.name);

        let install_root = match (install_root_override, spec.default_install_root.as_deref()) {
            (Some(path), _) => expand_tilde(&path.to_string_lossy()),
            (None, Some(default_root)) => expand_tilde(default_root),
            (None, None) => home_dir()
                .join(".local")
                .join("share")
                .join(format!("{}-installs", spec.name)),
        };
        if install_root.as_os_str().is_empty() {
            return Err(VinstError::Config(
                "Install root resolved to an empty path".to_string(),
            ));
        }
        debug!("Effective install root: {}", install_root.display());

        let mut config = Self::new(install_root);

        if let Some(api) = env::var("VINST_RELEASE_API").ok().filter(|s| !s.is_empty()) {
            config.release_api_base = api.trim_end_matches('/').to_string();
        }
        config.github_api_token = env::var("VINST_GITHUB_TOKEN")
            .or_else(|_| env::var("GITHUB_TOKEN"))
            .ok()
            .filter(|s| !s.is_empty());
        config.signing_tool = env::var("VINST_SIGNING_TOOL")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| expand_tilde(&s));
        config.python = env::var("VINST_PYTHON")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| expand_tilde(&s));
        config.scratch_parent = env::var("VINST_TMPDIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| expand_tilde(&s));
        config.allow_insecure_http = env::var("VINST_ALLOW_HTTP").is_ok_and(|v| v == "1");
        if let Ok(raw) = env::var("VINST_LOCK_TIMEOUT_SECS") {
            let secs = raw.parse::<u64>().map_err(|e| {
                VinstError::Config(format!("VINST_LOCK_TIMEOUT_SECS='{raw}' is not a number: {e}"))
            })?;
            config.lock_timeout = Duration::from_secs(secs);
        }

        debug!("Configuration loaded successfully.");
        Ok(config)
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }
}

/// Per-user directory that receives rolling log files.
pub fn logs_dir() -> PathBuf {
    ProjectDirs::from("", "", "vinst")
        .map(|dirs| dirs.data_local_dir().join("logs"))
        .unwrap_or_else(|| home_dir().join(".local").join("state").join("vinst").join("logs"))
}

pub fn home_dir() -> PathBuf {
    UserDirs::new().map_or_else(|| PathBuf::from("/"), |ud| ud.home_dir().to_path_buf())
}

/// Expands a leading `~` or `~/` to the user's home directory.
pub fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" {
        home_dir()
    } else if let Some(rest) = raw.strip_prefix("~/") {
        home_dir().join(rest)
    } else {
        PathBuf::from(raw)
    }
}
