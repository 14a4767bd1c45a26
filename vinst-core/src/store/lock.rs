// vinst-core/src/store/lock.rs
//! Advisory exclusive lock over one install root.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs4::fs_std::FileExt;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::debug;
use vinst_common::error::{Result, VinstError};
use vinst_common::layout::LOCK_FILE_NAME;

const STARTING_BACKOFF_DELAY_MS: u64 = 10;
const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// Held for the duration of one mutating store protocol; released on drop.
///
/// The lock file itself is left in place so that a waiting process never
/// ends up holding a lock on an unlinked inode.
#[derive(Debug)]
pub struct InstallLock {
    _file: Arc<File>,
    path: PathBuf,
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        debug!(lock = %self.path.display(), "Install root lock released");
    }
}

impl InstallLock {
    /// Creates `root` if needed and takes `root/.vinst.lock`, backing off
    /// exponentially until `timeout` elapses.
    pub async fn acquire(root: &Path, timeout: Duration) -> Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let path = root.join(LOCK_FILE_NAME);
        debug!(lock = %path.display(), "Waiting for install root lock");

        let open_path = path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&open_path)
        })
        .await
        .map_err(|e| VinstError::Generic(format!("lock task failed: {e}")))??;
        let file = Arc::new(file);

        let start = Instant::now();
        let backoff = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS));

        for delay in backoff {
            let candidate = Arc::clone(&file);
            let locked = tokio::task::spawn_blocking(move || candidate.try_lock_exclusive())
                .await
                .map_err(|e| VinstError::Generic(format!("lock task failed: {e}")))?;
            if let Ok(true) = locked {
                debug!(
                    lock = %path.display(),
                    wait_ms = start.elapsed().as_millis(),
                    "Install root lock acquired"
                );
                return Ok(Self { _file: file, path });
            }
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(delay.min(remaining)).await;
        }

        Err(VinstError::StoreLocked(format!(
            "another vinst process holds {} (waited {:?})",
            path.display(),
            timeout
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
