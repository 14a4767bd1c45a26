// vinst-common/src/model/artifact.rs
use std::path::{Path, PathBuf};

/// A single fetched file inside the run's scratch workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceArtifact {
    pub path: PathBuf,
    /// Where the file came from (URL or original local path), for messages.
    pub origin: String,
    /// Digest published alongside the artifact (e.g. a release asset digest), lowercase hex.
    pub advertised_sha256: Option<String>,
}

impl SourceArtifact {
    pub fn new(path: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            origin: origin.into(),
            advertised_sha256: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An extracted and validated release tree, still inside scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTree {
    /// Directory that becomes the installed version directory.
    pub root: PathBuf,
    /// Non-fatal findings from structural validation.
    pub warnings: Vec<String>,
}

impl ExtractedTree {
    pub fn root(&self) -> &Path {
        &self.root
    }
}
