// vinst-net/src/validation.rs
use url::Url;
use vinst_common::error::{Result, VinstError};

/// Validates a URL, ensuring it uses the HTTPS scheme (or HTTP when explicitly allowed).
pub fn validate_url(url_str: &str, allow_insecure_http: bool) -> Result<Url> {
    let url = Url::parse(url_str)
        .map_err(|e| VinstError::Config(format!("Failed to parse URL '{url_str}': {e}")))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if allow_insecure_http => {
            tracing::warn!("Using insecure HTTP for '{}'", url_str);
            Ok(url)
        }
        other => Err(VinstError::Config(format!(
            "Invalid URL scheme for '{url_str}': Must be https, but got '{other}'"
        ))),
    }
}
