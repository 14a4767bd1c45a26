// vinst-core/src/checksum.rs
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, error};
use vinst_common::error::{Result, VinstError};

const CHUNK_SIZE: usize = 8192;

/// Lowercase hex SHA-256 of the whole file, read in fixed-size chunks.
pub fn compute_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut total_bytes_read: u64 = 0;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total_bytes_read += n as u64;
    }

    let actual = hex::encode(hasher.finalize());
    debug!(
        "Calculated SHA256 for {}: {} ({} bytes read)",
        path.display(),
        actual,
        total_bytes_read
    );
    Ok(actual)
}

/// True iff the file's digest equals `expected` (hex, any case).
pub fn matches(path: &Path, expected: &str) -> Result<bool> {
    let actual = compute_sha256(path)?;
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}

pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    debug!("Verifying checksum for: {}", path.display());
    let actual = compute_sha256(path)?;
    debug!("Expected SHA256:   {}", expected);

    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        error!("Checksum mismatch for {}", path.display());
        Err(VinstError::Integrity(format!(
            "Checksum mismatch for {}: expected {}, got {}",
            path.display(),
            expected,
            actual
        )))
    }
}
