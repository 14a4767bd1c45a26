// vinst-net/src/release.rs
//! Release-listing queries (GitHub-compatible JSON) and declarative asset selection.
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use vinst_common::error::{Result, VinstError};

use crate::validation::validate_url;

pub const SUPPORTED_ARCHIVE_EXTENSIONS: [&str; 9] = [
    ".tar.gz", ".tgz", ".tar.bz2", ".tbz2", ".tbz", ".tar.xz", ".txz", ".zip", ".tar",
];

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
    /// `sha256:<hex>` as published by the release host, when available.
    #[serde(default)]
    pub digest: Option<String>,
}

impl Asset {
    pub fn sha256(&self) -> Option<String> {
        self.digest
            .as_deref()
            .and_then(|d| d.strip_prefix("sha256:"))
            .map(|d| d.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    /// RFC 3339 timestamp; lexicographic order equals chronological order.
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListingBody {
    Many(Vec<Release>),
    One(Box<Release>),
}

/// Expands `owner/repo` into `{api_base}/repos/owner/repo/releases`; full URLs pass through.
pub fn release_endpoint(api_base: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        location.to_string()
    } else {
        format!(
            "{}/repos/{}/releases",
            api_base.trim_end_matches('/'),
            location.trim_matches('/')
        )
    }
}

pub async fn fetch_release_listing(
    client: &Client,
    endpoint: &str,
    token: Option<&str>,
    allow_insecure_http: bool,
) -> Result<Vec<Release>> {
    validate_url(endpoint, allow_insecure_http)?;
    debug!("Querying release listing at {}", endpoint);

    let mut request = client
        .get(endpoint)
        .header(ACCEPT, "application/vnd.github+json");
    if let Some(token) = token {
        request = request.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = request.send().await.map_err(|e| {
        VinstError::Fetch(endpoint.to_string(), format!("release query failed: {e}"))
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(VinstError::Fetch(
            endpoint.to_string(),
            format!("release query returned HTTP {status}"),
        ));
    }
    let body = response.text().await.map_err(|e| {
        VinstError::Fetch(endpoint.to_string(), format!("failed to read release listing: {e}"))
    })?;
    parse_release_listing(&body)
        .map_err(|e| VinstError::Fetch(endpoint.to_string(), format!("malformed release listing: {e}")))
}

pub fn parse_release_listing(body: &str) -> Result<Vec<Release>> {
    match serde_json::from_str::<ListingBody>(body)? {
        ListingBody::Many(releases) => Ok(releases),
        ListingBody::One(release) => Ok(vec![*release]),
    }
}

/// Newest published, non-draft release. Pre-releases only count when nothing else exists.
pub fn select_latest_release(releases: &[Release]) -> Option<&Release> {
    let newest = |stable_only: bool| {
        releases
            .iter()
            .filter(|r| !r.draft && (!stable_only || !r.prerelease))
            .max_by(|a, b| a.published_at.cmp(&b.published_at))
    };
    newest(true).or_else(|| newest(false))
}

/// Which release assets are acceptable, as data rather than control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPolicy {
    /// Accepted filename suffixes, lowercase.
    pub extensions: Vec<String>,
    /// Asset names containing any of these (lowercase) are rejected.
    pub exclude_tokens: Vec<String>,
}

impl AssetPolicy {
    pub fn new(extensions: &[&str], exclude_tokens: &[&str]) -> Self {
        Self {
            extensions: extensions.iter().map(|s| s.to_ascii_lowercase()).collect(),
            exclude_tokens: exclude_tokens.iter().map(|s| s.to_ascii_lowercase()).collect(),
        }
    }

    /// Supported archive formats, excluding assets built for other platforms.
    pub fn for_host() -> Self {
        let mut exclude: Vec<&str> = Vec::new();
        match std::env::consts::OS {
            "linux" => exclude.extend(["windows", "win32", "win64", "macos", "darwin", "osx"]),
            "macos" => exclude.extend(["windows", "win32", "win64", "linux"]),
            "windows" => exclude.extend(["linux", "macos", "darwin", "osx"]),
            _ => {}
        }
        match std::env::consts::ARCH {
            "x86_64" => exclude.extend(["aarch64", "arm64", "armv7", "armhf", "i686", "i386"]),
            "aarch64" => exclude.extend(["x86_64", "amd64", "x64", "i686", "i386"]),
            _ => {}
        }
        Self::new(&SUPPORTED_ARCHIVE_EXTENSIONS, &exclude)
    }

    pub fn accepts(&self, asset_name: &str) -> bool {
        let name = asset_name.to_ascii_lowercase();
        self.extensions.iter().any(|ext| name.ends_with(ext.as_str()))
            && !self
                .exclude_tokens
                .iter()
                .any(|token| name.contains(token.as_str()))
    }

    /// First acceptable asset in listing order.
    pub fn select<'a>(&self, release: &'a Release) -> Option<&'a Asset> {
        release.assets.iter().find(|asset| self.accepts(&asset.name))
    }
}
