use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::fs::{self, File as TokioFile};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};
use vinst_common::error::{Result, VinstError};

use crate::validation::validate_url;

const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT_STRING: &str = "vinst release installer (Rust)";

pub fn build_http_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| VinstError::Generic(format!("Failed to build HTTP client: {e}")))
}

/// Streams `url` into `final_path`.
///
/// The body is written to a hidden sibling first and only renamed to
/// `final_path` once complete, so a failed transfer never leaves a
/// partial artifact behind. Returns the number of bytes written.
pub async fn download_to_file(
    client: &Client,
    url: &str,
    final_path: &Path,
    allow_insecure_http: bool,
    show_progress: bool,
) -> Result<u64> {
    validate_url(url, allow_insecure_http)?;

    let temp_filename = format!(
        ".{}.download",
        final_path.file_name().unwrap_or_default().to_string_lossy()
    );
    let temp_path = final_path.with_file_name(temp_filename);
    debug!("Downloading {} to temporary path: {}", url, temp_path.display());

    let result = stream_body(client, url, &temp_path, show_progress).await;
    match result {
        Ok(bytes) => {
            fs::rename(&temp_path, final_path).await.map_err(|e| {
                VinstError::Fetch(
                    url.to_string(),
                    format!(
                        "failed to move {} to {}: {e}",
                        temp_path.display(),
                        final_path.display()
                    ),
                )
            })?;
            debug!("Downloaded {} bytes to {}", bytes, final_path.display());
            Ok(bytes)
        }
        Err(e) => {
            if let Err(remove_err) = fs::remove_file(&temp_path).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    debug!(
                        "Failed to remove partial download {}: {}",
                        temp_path.display(),
                        remove_err
                    );
                }
            }
            Err(e)
        }
    }
}

async fn stream_body(
    client: &Client,
    url: &str,
    temp_path: &Path,
    show_progress: bool,
) -> Result<u64> {
    let response = client.get(url).send().await.map_err(|e| {
        debug!("HTTP request failed for {url}: {e}");
        VinstError::Fetch(url.to_string(), format!("HTTP request failed: {e}"))
    })?;
    let status = response.status();
    debug!("Received HTTP status: {} for {}", status, url);

    if !status.is_success() {
        error!("HTTP error {} for URL {}", status, url);
        let reason = match status {
            StatusCode::NOT_FOUND => "Resource not found (404)".to_string(),
            StatusCode::FORBIDDEN => "Access forbidden (403)".to_string(),
            _ => format!("HTTP error {status}"),
        };
        return Err(VinstError::Fetch(url.to_string(), reason));
    }

    let progress = match (show_progress, response.content_length()) {
        (true, Some(len)) => {
            let bar = ProgressBar::new(len);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
            );
            Some(bar)
        }
        _ => None,
    };

    let mut temp_file = TokioFile::create(temp_path).await.map_err(|e| {
        VinstError::Fetch(
            url.to_string(),
            format!("failed to create temp file {}: {e}", temp_path.display()),
        )
    })?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            VinstError::Fetch(url.to_string(), format!("failed to read response body: {e}"))
        })?;
        temp_file.write_all(&chunk).await.map_err(|e| {
            VinstError::Fetch(
                url.to_string(),
                format!("failed to write to {}: {e}", temp_path.display()),
            )
        })?;
        written += chunk.len() as u64;
        if let Some(bar) = &progress {
            bar.set_position(written);
        }
    }
    temp_file.flush().await?;
    temp_file.sync_all().await?;
    drop(temp_file);

    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    Ok(written)
}
