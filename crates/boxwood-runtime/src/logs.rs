//! Detached box output.

use std::fs::File;
use std::path::{Path, PathBuf};

use boxwood_common::constants::LOG_FILE;
use boxwood_common::error::{BoxError, Result};

/// Returns the output log path of box `name` under `box_dir`.
#[must_use]
pub fn log_path(box_dir: &Path, name: &str) -> PathBuf {
    box_dir.join(name).join(LOG_FILE)
}

/// Reads the output of box `name`.
///
/// Returns an empty string if the box never wrote a log (interactive boxes
/// do not have one).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_logs(box_dir: &Path, name: &str) -> Result<String> {
    let path = log_path(box_dir, name);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(BoxError::io(path, e)),
    }
}

/// Creates (or truncates) the output log of box `name`, creating the box
/// directory if needed. The returned file becomes the box's stdout and
/// stderr.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created.
pub fn create_log(box_dir: &Path, name: &str) -> Result<File> {
    let path = log_path(box_dir, name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BoxError::io(parent, e))?;
    }
    File::create(&path).map_err(|e| BoxError::io(path, e))
}
