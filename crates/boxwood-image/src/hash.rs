//! SHA-256 content verification.

use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;

use boxwood_common::error::{BoxError, Result};
use sha2::{Digest, Sha256};

/// Computes the lowercase hex SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<String> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(|e| BoxError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| BoxError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Checks that `path` hashes to `expected` (hex, case-insensitive, optional `sha256:` prefix).
///
/// # Errors
///
/// Returns [`BoxError::HashMismatch`] if the digests differ.
pub fn validate_hash(path: &Path, expected: &str) -> Result<()> {
    let expected = expected
        .strip_prefix("sha256:")
        .unwrap_or(expected)
        .to_ascii_lowercase();
    let actual = hash_file(path)?;
    if actual != expected {
        return Err(BoxError::HashMismatch {
            resource: path.display().to_string(),
            expected,
            actual,
        });
    }
    tracing::debug!(path = %path.display(), "SHA-256 hash verified");
    Ok(())
}
