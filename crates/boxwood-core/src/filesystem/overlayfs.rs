//! `OverlayFS` management for box root filesystems.
//!
//! A box root is the image directory as the read-only lower layer, stacked
//! under a per-box writable upper layer. Writes never reach the image.

use std::path::{Path, PathBuf};

use boxwood_common::error::{BoxError, Result};
use nix::mount::{MsFlags, mount};

/// Directories that make up one overlay mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers, topmost first.
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Scratch directory required by `OverlayFS`, on the same filesystem as `upper_dir`.
    pub work_dir: PathBuf,
    /// Mount point of the merged view.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Renders the `lowerdir=..,upperdir=..,workdir=..` mount data string.
    #[must_use]
    pub fn mount_data(&self) -> String {
        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        format!(
            "lowerdir={lowers},upperdir={},workdir={}",
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}

/// Mounts an `OverlayFS` described by `config`.
///
/// Creates the upper, work, and merged directories if they do not exist.
///
/// # Errors
///
/// Returns an error if directory creation or the mount syscall fails.
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    if config.lower_dirs.is_empty() {
        return Err(BoxError::Config {
            message: "overlay needs at least one lower directory".into(),
        });
    }
    for dir in [&config.upper_dir, &config.work_dir, &config.merged_dir] {
        std::fs::create_dir_all(dir).map_err(|e| BoxError::io(dir, e))?;
    }

    let data = config.mount_data();
    mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(data.as_str()),
    )
    .map_err(|source| BoxError::Mount {
        target: config.merged_dir.clone(),
        source,
    })?;

    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(())
}

/// Detaches the overlay at `merged_dir`. Not mounted is not an error.
///
/// # Errors
///
/// Returns an error if the unmount syscall fails.
pub fn unmount_overlay(merged_dir: &Path) -> Result<()> {
    super::mount::unmount(merged_dir)?;
    tracing::info!(path = %merged_dir.display(), "overlayfs unmounted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_data_joins_lowers_with_colons() {
        let config = OverlayConfig {
            lower_dirs: vec![PathBuf::from("/img/top"), PathBuf::from("/img/base")],
            upper_dir: PathBuf::from("/w/upper"),
            work_dir: PathBuf::from("/w/work"),
            merged_dir: PathBuf::from("/b/rootfs"),
        };
        assert_eq!(
            config.mount_data(),
            "lowerdir=/img/top:/img/base,upperdir=/w/upper,workdir=/w/work"
        );
    }

    #[test]
    fn empty_lower_list_is_rejected_before_touching_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = OverlayConfig {
            lower_dirs: Vec::new(),
            upper_dir: dir.path().join("upper"),
            work_dir: dir.path().join("work"),
            merged_dir: dir.path().join("merged"),
        };
        assert!(matches!(
            mount_overlay(&config),
            Err(BoxError::Config { .. })
        ));
        assert!(!config.upper_dir.exists());
    }
}
