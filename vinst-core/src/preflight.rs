// vinst-core/src/preflight.rs
use tracing::{debug, error};
use vinst_common::error::{Result, VinstError};

/// Fails with a configuration error listing every required app missing from PATH.
pub fn check_required_apps(apps: &[String]) -> Result<()> {
    let missing: Vec<&str> = apps
        .iter()
        .map(String::as_str)
        .filter(|app| match which::which(app) {
            Ok(path) => {
                debug!("Found required app {} at {}", app, path.display());
                false
            }
            Err(_) => true,
        })
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    error!("Missing required apps: {}", missing.join(", "));
    Err(VinstError::Config(format!(
        "Missing required apps on PATH: {}",
        missing.join(", ")
    )))
}
