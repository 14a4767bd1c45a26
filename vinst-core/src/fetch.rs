// vinst-core/src/fetch.rs
//! Resolves a [`SourceDescriptor`] into one local file inside the run's scratch workspace.
use std::future::Future;
use std::path::{Path, PathBuf};

use reqwest::Client;
use tracing::{debug, error, info};
use url::Url;
use vinst_common::config::{expand_tilde, Config};
use vinst_common::error::{Result, VinstError};
use vinst_common::manifest::{SourceDescriptor, SourceKind};
use vinst_common::model::SourceArtifact;
use vinst_net::{
    build_http_client, download_to_file, fetch_release_listing, release_endpoint,
    select_latest_release, AssetPolicy,
};

const FALLBACK_FILE_NAME: &str = "download";

/// A strategy that turns a source description into a local artifact.
///
/// Implementations write only below `scratch` and never touch the install root.
pub trait Fetcher: Send + Sync {
    fn fetch(
        &self,
        source: &SourceDescriptor,
        scratch: &Path,
    ) -> impl Future<Output = Result<SourceArtifact>> + Send;

    /// Fetches an auxiliary reference (signature, public key) that is either a
    /// URL or a local path.
    fn fetch_reference(
        &self,
        reference: &str,
        scratch: &Path,
    ) -> impl Future<Output = Result<PathBuf>> + Send;
}

#[derive(Debug, Clone)]
pub struct DefaultFetcher {
    client: Client,
    release_api_base: String,
    api_token: Option<String>,
    allow_insecure_http: bool,
    show_progress: bool,
    policy: AssetPolicy,
}

impl DefaultFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            release_api_base: config.release_api_base.clone(),
            api_token: config.github_api_token.clone(),
            allow_insecure_http: config.allow_insecure_http,
            show_progress: false,
            policy: AssetPolicy::for_host(),
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    async fn fetch_remote(&self, url: &str, dir: &Path) -> Result<SourceArtifact> {
        let dest = dir.join(file_name_from_url(url));
        info!("Downloading {}", url);
        download_to_file(
            &self.client,
            url,
            &dest,
            self.allow_insecure_http,
            self.show_progress,
        )
        .await?;
        Ok(SourceArtifact::new(dest, url))
    }

    async fn fetch_latest_release(&self, location: &str, dir: &Path) -> Result<SourceArtifact> {
        let endpoint = release_endpoint(&self.release_api_base, location);
        let releases = fetch_release_listing(
            &self.client,
            &endpoint,
            self.api_token.as_deref(),
            self.allow_insecure_http,
        )
        .await?;
        let release = select_latest_release(&releases).ok_or_else(|| {
            VinstError::NoSuitableAsset(format!("no published release found at {endpoint}"))
        })?;
        debug!(
            "Selected release {} ({} asset(s))",
            release.tag_name,
            release.assets.len()
        );
        let asset = self.policy.select(release).ok_or_else(|| {
            error!(
                "No asset of release {} matches the asset policy",
                release.tag_name
            );
            VinstError::NoSuitableAsset(format!(
                "release {} has no asset with a supported archive extension for this platform (assets: {})",
                release.tag_name,
                release
                    .assets
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        let dest = dir.join(sanitize_file_name(&asset.name));
        info!("Downloading release asset {}", asset.name);
        download_to_file(
            &self.client,
            &asset.browser_download_url,
            &dest,
            self.allow_insecure_http,
            self.show_progress,
        )
        .await?;
        let mut artifact = SourceArtifact::new(dest, asset.browser_download_url.clone());
        artifact.advertised_sha256 = asset.sha256();
        Ok(artifact)
    }

    async fn fetch_local(&self, location: &str, dir: &Path) -> Result<SourceArtifact> {
        let src = expand_tilde(location);
        let is_file = tokio::fs::metadata(&src)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            error!("Local source {} does not exist", src.display());
            return Err(VinstError::SourceNotFound(src.display().to_string()));
        }
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
        let dest = dir.join(sanitize_file_name(&name));
        debug!("Copying local source {} -> {}", src.display(), dest.display());
        tokio::fs::copy(&src, &dest).await.map_err(|e| {
            VinstError::Fetch(src.display().to_string(), format!("copy failed: {e}"))
        })?;
        Ok(SourceArtifact::new(dest, src.display().to_string()))
    }
}

impl Fetcher for DefaultFetcher {
    async fn fetch(&self, source: &SourceDescriptor, scratch: &Path) -> Result<SourceArtifact> {
        let dir = scratch.join("artifact");
        tokio::fs::create_dir_all(&dir).await?;
        match source.kind {
            SourceKind::RemoteArchive => self.fetch_remote(&source.location, &dir).await,
            SourceKind::LatestReleaseQuery => {
                self.fetch_latest_release(&source.location, &dir).await
            }
            SourceKind::LocalPath => self.fetch_local(&source.location, &dir).await,
        }
    }

    async fn fetch_reference(&self, reference: &str, scratch: &Path) -> Result<PathBuf> {
        if is_url(reference) {
            let dir = scratch.join("refs");
            tokio::fs::create_dir_all(&dir).await?;
            Ok(self.fetch_remote(reference, &dir).await?.path)
        } else {
            let path = expand_tilde(reference);
            if !path.is_file() {
                return Err(VinstError::SourceNotFound(path.display().to_string()));
            }
            Ok(path)
        }
    }
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Last non-empty path segment of `url`, usable as a file name.
fn file_name_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(str::to_string))
        })
        .map(|name| sanitize_file_name(&name))
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned.starts_with('.') {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn local_source(location: &str) -> SourceDescriptor {
        SourceDescriptor {
            kind: SourceKind::LocalPath,
            location: location.to_string(),
            sha256: None,
            gpg_key: None,
            gpg_signature: None,
        }
    }

    #[test]
    fn url_file_names() {
        assert_eq!(
            file_name_from_url("https://example.com/a/b/tool-1.0.tar.gz"),
            "tool-1.0.tar.gz"
        );
        assert_eq!(file_name_from_url("https://example.com/"), "download");
        assert_eq!(file_name_from_url("https://example.com/x/.hidden"), "download");
    }

    #[tokio::test]
    async fn local_path_is_copied_into_scratch() {
        let src_dir = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let src = src_dir.path().join("tool.zip");
        fs::write(&src, b"zipbytes").unwrap();

        let fetcher = DefaultFetcher::new(&Config::new("/unused")).unwrap();
        let artifact = fetcher
            .fetch(&local_source(&src.to_string_lossy()), scratch.path())
            .await
            .unwrap();
        assert!(artifact.path().starts_with(scratch.path()));
        assert_eq!(fs::read(artifact.path()).unwrap(), b"zipbytes");
        assert_eq!(artifact.advertised_sha256, None);
    }

    #[tokio::test]
    async fn missing_local_path_is_source_not_found() {
        let scratch = TempDir::new().unwrap();
        let fetcher = DefaultFetcher::new(&Config::new("/unused")).unwrap();
        let missing = scratch.path().join("nope.tar.gz");
        let err = fetcher
            .fetch(&local_source(&missing.to_string_lossy()), scratch.path())
            .await
            .unwrap_err();
        assert!(matches!(err, VinstError::SourceNotFound(_)));

        let err = fetcher
            .fetch(&local_source(&scratch.path().to_string_lossy()), scratch.path())
            .await
            .unwrap_err();
        assert!(matches!(err, VinstError::SourceNotFound(_)), "directories are not artifacts");
    }

    #[tokio::test]
    async fn plain_http_is_rejected_by_default() {
        let scratch = TempDir::new().unwrap();
        let fetcher = DefaultFetcher::new(&Config::new("/unused")).unwrap();
        let source = SourceDescriptor {
            kind: SourceKind::RemoteArchive,
            location: "http://example.invalid/tool.tar.gz".to_string(),
            ..local_source("")
        };
        let err = fetcher.fetch(&source, scratch.path()).await.unwrap_err();
        assert!(matches!(err, VinstError::Config(_)), "{err:?}");
    }
}
