use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum VinstError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Manifest Parsing Error: {0}")]
    Toml(#[from] Arc<toml::de::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("FetchError: Failed to fetch '{0}': {1}")]
    Fetch(String, String),

    #[error("No suitable release asset: {0}")]
    NoSuitableAsset(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("IntegrityError: {0}")]
    Integrity(String),

    #[error("Signature missing: {0}")]
    SignatureMissing(String),

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Signing tool unavailable: {0}")]
    SigningToolUnavailable(String),

    #[error("Unsupported archive: {0}")]
    UnsupportedArchive(String),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Invalid install store: {0}")]
    InvalidStore(String),

    #[error("Install store locked: {0}")]
    StoreLocked(String),

    #[error("DeploymentInconsistent: {0}")]
    DeploymentInconsistent(String),

    #[error("No such version: {0}")]
    NoSuchVersion(String),

    #[error("Post-install step '{0}' failed: {1}")]
    PostInstallFailed(String, String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl VinstError {
    /// True for failures that happen before anything under the install root is
    /// touched.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            VinstError::Config(_)
                | VinstError::Toml(_)
                | VinstError::Fetch(..)
                | VinstError::NoSuitableAsset(_)
                | VinstError::SourceNotFound(_)
                | VinstError::Integrity(_)
                | VinstError::SignatureMissing(_)
                | VinstError::SignatureInvalid(_)
                | VinstError::SigningToolUnavailable(_)
                | VinstError::UnsupportedArchive(_)
                | VinstError::InvalidLayout(_)
        )
    }
}

impl From<std::io::Error> for VinstError {
    fn from(err: std::io::Error) -> Self {
        VinstError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for VinstError {
    fn from(err: reqwest::Error) -> Self {
        VinstError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for VinstError {
    fn from(err: serde_json::Error) -> Self {
        VinstError::Json(Arc::new(err))
    }
}

impl From<toml::de::Error> for VinstError {
    fn from(err: toml::de::Error) -> Self {
        VinstError::Toml(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, VinstError>;
