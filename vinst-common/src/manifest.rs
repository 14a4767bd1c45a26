// vinst-common/src/manifest.rs
//! Release manifest (TOML) parsing and validation into an immutable [`ReleaseSpec`].
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, VinstError};

pub const DEFAULT_REQUIRED_DIRS: [&str; 2] = ["src", "data"];
pub const DEFAULT_OPTIONAL_MANIFEST: &str = "requirements.txt";

/// How the release artifact is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    RemoteArchive,
    LatestReleaseQuery,
    LocalPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub location: String,
    /// Lowercase hex SHA-256 of the artifact.
    pub sha256: Option<String>,
    pub gpg_key: Option<String>,
    pub gpg_signature: Option<String>,
}

impl SourceDescriptor {
    pub fn requires_signature(&self) -> bool {
        self.gpg_key.is_some() || self.gpg_signature.is_some()
    }
}

/// Expected top-level structure of an extracted release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutRequirements {
    pub required_dirs: Vec<String>,
    pub optional_manifest: Option<String>,
}

impl Default for LayoutRequirements {
    fn default() -> Self {
        Self {
            required_dirs: DEFAULT_REQUIRED_DIRS.iter().map(|s| s.to_string()).collect(),
            optional_manifest: Some(DEFAULT_OPTIONAL_MANIFEST.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuxiliaryFlags {
    pub setup_venv: bool,
}

/// A validated release description. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSpec {
    pub name: String,
    pub version: String,
    pub source: SourceDescriptor,
    pub entrypoint: Option<String>,
    pub icon: Option<String>,
    pub default_install_root: Option<String>,
    pub layout: LayoutRequirements,
    pub aux: AuxiliaryFlags,
    pub required_apps: Vec<String>,
}

impl ReleaseSpec {
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading release manifest from {}", path.display());
        if !path.is_file() {
            return Err(VinstError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let manifest: RawManifest = toml::from_str(raw)?;
        manifest.validate()
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    source: Option<RawSource>,
    default_install_root: Option<String>,
    entrypoint: Option<String>,
    icon: Option<String>,
    setup_venv: Option<bool>,
    required_apps: Option<RawRequiredApps>,
    layout: Option<RawLayout>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    #[serde(rename = "type")]
    kind: Option<String>,
    location: Option<String>,
    sha256: Option<String>,
    gpg_key: Option<String>,
    gpg_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRequiredApps {
    List(Vec<String>),
    Table { apps: Vec<String> },
}

#[derive(Debug, Deserialize)]
struct RawLayout {
    required: Option<Vec<String>>,
    optional_manifest: Option<String>,
}

impl RawManifest {
    fn validate(self) -> Result<ReleaseSpec> {
        let name = required_field(self.name, "name")?;
        let version = required_field(self.version, "version")?;
        validate_component(&name, "name")?;
        validate_component(&version, "version")?;
        let raw_source = self
            .source
            .ok_or_else(|| VinstError::Config("Missing required config key: source".to_string()))?;
        let source = raw_source.validate()?;

        let layout = match self.layout {
            Some(raw) => {
                let defaults = LayoutRequirements::default();
                LayoutRequirements {
                    required_dirs: raw.required.unwrap_or(defaults.required_dirs),
                    optional_manifest: match raw.optional_manifest {
                        Some(m) if m.trim().is_empty() => None,
                        Some(m) => Some(m),
                        None => defaults.optional_manifest,
                    },
                }
            }
            None => LayoutRequirements::default(),
        };
        for dir in &layout.required_dirs {
            if dir.is_empty() || Path::new(dir).is_absolute() || dir.contains("..") {
                return Err(VinstError::Config(format!(
                    "Invalid required layout entry '{dir}'"
                )));
            }
        }

        let required_apps = match self.required_apps {
            Some(RawRequiredApps::List(apps)) | Some(RawRequiredApps::Table { apps }) => apps
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            None => Vec::new(),
        };

        Ok(ReleaseSpec {
            name,
            version,
            source,
            entrypoint: self.entrypoint.filter(|s| !s.trim().is_empty()),
            icon: self.icon.filter(|s| !s.trim().is_empty()),
            default_install_root: self.default_install_root,
            layout,
            aux: AuxiliaryFlags {
                setup_venv: self.setup_venv.unwrap_or(true),
            },
            required_apps,
        })
    }
}

impl RawSource {
    /// A missing `type` means `url`: an http(s) location is downloaded, anything
    /// else is read as a local path. `git` sources are rejected like any other
    /// unknown type; releases must be published as archives.
    fn validate(self) -> Result<SourceDescriptor> {
        let location = required_field(self.location, "source.location")?;
        let type_str = self.kind.unwrap_or_else(|| "url".to_string());
        let is_remote = location.starts_with("http://") || location.starts_with("https://");
        let kind = match type_str.to_ascii_lowercase().as_str() {
            "url" | "archive" => {
                if is_remote {
                    SourceKind::RemoteArchive
                } else {
                    SourceKind::LocalPath
                }
            }
            "local" | "path" => SourceKind::LocalPath,
            "latest-release" | "github-release" | "release" => SourceKind::LatestReleaseQuery,
            other => {
                return Err(VinstError::Config(format!("Unknown source type: {other}")));
            }
        };

        let sha256 = match self.sha256 {
            Some(digest) => {
                let digest = digest.trim().to_ascii_lowercase();
                if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(VinstError::Config(format!(
                        "source.sha256 must be 64 hex characters, got '{digest}'"
                    )));
                }
                Some(digest)
            }
            None => None,
        };

        Ok(SourceDescriptor {
            kind,
            location,
            sha256,
            gpg_key: self.gpg_key.filter(|s| !s.trim().is_empty()),
            gpg_signature: self.gpg_signature.filter(|s| !s.trim().is_empty()),
        })
    }
}

fn required_field(value: Option<String>, key: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(VinstError::Config(format!(
            "Missing required config key: {key}"
        ))),
    }
}

// Names end up as directory components of the install root.
fn validate_component(value: &str, key: &str) -> Result<()> {
    if value.contains('/') || value.contains('\\') || value.contains("..") || value.starts_with('.')
    {
        return Err(VinstError::Config(format!(
            "Invalid {key} '{value}' contains disallowed characters"
        )));
    }
    Ok(())
}
