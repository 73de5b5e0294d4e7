//! Per-box root filesystems.
//!
//! [`OverlayWorkspace`] stacks a writable layer on top of an unpacked image:
//!
//! ```text
//! lower   <root>/image/<image>
//! upper   <root>/writable/<box>/upper
//! work    <root>/writable/<box>/work
//! merged  <root>/box/<box>/rootfs
//! ```
//!
//! An optional volume is bind-mounted from the host into the merged root.

use std::path::{Path, PathBuf};

use boxwood_common::config::RuntimeConfig;
use boxwood_common::constants::ROOTFS_DIR;
use boxwood_common::error::{BoxError, Result};
use boxwood_common::rollback::Rollback;
use boxwood_common::types::VolumeSpec;
use boxwood_core::filesystem::mount;
use boxwood_core::filesystem::overlayfs::{self, OverlayConfig};
use boxwood_image::store::ImageStore;

/// Builds and tears down the root filesystem of a box.
pub trait WorkspaceProvider: Send + Sync {
    /// Prepares the root filesystem of `box_name` from `image` and returns
    /// its path.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is missing or any mount fails. Partial
    /// work is undone first.
    fn create(&self, image: &str, box_name: &str, volume: Option<&VolumeSpec>) -> Result<PathBuf>;

    /// Removes the root filesystem of `box_name`, attempting every step.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Cleanup`] listing the steps that failed.
    fn delete(&self, box_name: &str, volume: Option<&VolumeSpec>) -> Result<()>;
}

/// [`WorkspaceProvider`] backed by overlayfs.
#[derive(Debug, Clone)]
pub struct OverlayWorkspace {
    image_dir: PathBuf,
    box_dir: PathBuf,
    writable_dir: PathBuf,
}

impl OverlayWorkspace {
    /// Lays workspaces out under the directories of `config`.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            image_dir: config.image_dir(),
            box_dir: config.box_dir(),
            writable_dir: config.writable_dir(),
        }
    }

    /// Merged root filesystem of `box_name`.
    #[must_use]
    pub fn rootfs(&self, box_name: &str) -> PathBuf {
        self.box_dir.join(box_name).join(ROOTFS_DIR)
    }

    fn overlay(&self, lower: PathBuf, box_name: &str) -> OverlayConfig {
        let writable = self.writable_dir.join(box_name);
        OverlayConfig {
            lower_dirs: vec![lower],
            upper_dir: writable.join("upper"),
            work_dir: writable.join("work"),
            merged_dir: self.rootfs(box_name),
        }
    }
}

/// Where `volume` appears inside `rootfs`.
fn volume_target(rootfs: &Path, volume: &VolumeSpec) -> PathBuf {
    rootfs.join(
        volume
            .container
            .strip_prefix("/")
            .unwrap_or(&volume.container),
    )
}

fn remove_tree(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BoxError::io(path, e)),
    }
}

/// Removes an emptied mount point; it must never be removed recursively.
fn remove_mount_point(path: &Path) -> Result<()> {
    match std::fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BoxError::io(path, e)),
    }
}

impl WorkspaceProvider for OverlayWorkspace {
    fn create(&self, image: &str, box_name: &str, volume: Option<&VolumeSpec>) -> Result<PathBuf> {
        let lower = ImageStore::open(&self.image_dir)?.path(image)?;
        let config = self.overlay(lower, box_name);
        let writable = self.writable_dir.join(box_name);
        let mut undo = Rollback::new("workspace create");

        undo.push(format!("remove {}", writable.display()), || {
            remove_tree(&writable)?;
            remove_mount_point(&config.merged_dir)
        });
        overlayfs::mount_overlay(&config)?;
        undo.push(format!("unmount {}", config.merged_dir.display()), || {
            overlayfs::unmount_overlay(&config.merged_dir)
        });

        if let Some(volume) = volume {
            let target = volume_target(&config.merged_dir, volume);
            mount::bind_mount(&volume.host, &target)?;
            tracing::info!(
                host = %volume.host.display(),
                target = %target.display(),
                "volume mounted"
            );
        }

        undo.commit();
        tracing::info!(image, box_name, rootfs = %config.merged_dir.display(), "workspace ready");
        Ok(config.merged_dir)
    }

    fn delete(&self, box_name: &str, volume: Option<&VolumeSpec>) -> Result<()> {
        let rootfs = self.rootfs(box_name);
        let mut failures = Vec::new();

        if let Some(volume) = volume {
            if let Err(e) = mount::unmount(&volume_target(&rootfs, volume)) {
                failures.push(e);
            }
        }
        if let Err(e) = overlayfs::unmount_overlay(&rootfs) {
            failures.push(e);
        }
        if let Err(e) = remove_mount_point(&rootfs) {
            failures.push(e);
        }
        if let Err(e) = remove_tree(&self.writable_dir.join(box_name)) {
            failures.push(e);
        }

        BoxError::check_cleanup(failures)?;
        tracing::info!(box_name, "workspace deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(root: &Path) -> OverlayWorkspace {
        OverlayWorkspace::new(&RuntimeConfig::with_root(root))
    }

    #[test]
    fn layout_follows_the_runtime_root() {
        let ws = workspace(Path::new("/var/lib/boxwood"));
        let overlay = ws.overlay(PathBuf::from("/var/lib/boxwood/image/busybox"), "web");
        assert_eq!(overlay.upper_dir, PathBuf::from("/var/lib/boxwood/writable/web/upper"));
        assert_eq!(overlay.work_dir, PathBuf::from("/var/lib/boxwood/writable/web/work"));
        assert_eq!(overlay.merged_dir, PathBuf::from("/var/lib/boxwood/box/web/rootfs"));
    }

    #[test]
    fn volume_target_is_relative_to_rootfs() {
        let volume: VolumeSpec = "/srv/data:/data".parse().expect("volume");
        assert_eq!(
            volume_target(Path::new("/b/web/rootfs"), &volume),
            PathBuf::from("/b/web/rootfs/data")
        );
    }

    #[test]
    fn create_with_unknown_image_leaves_nothing_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ws = workspace(dir.path());
        let err = ws.create("missing", "web", None).unwrap_err();
        assert!(matches!(err, BoxError::NotFound { kind: "image", .. }));
        assert!(!dir.path().join("writable/web").exists());
        assert!(!dir.path().join("box/web").exists());
    }

    #[test]
    fn delete_of_unmounted_workspace_cleans_directories() {
        if !nix::unistd::geteuid().is_root() {
            eprintln!("Skipping workspace delete test: requires root");
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let ws = workspace(dir.path());
        std::fs::create_dir_all(dir.path().join("writable/web/upper")).expect("mkdir");
        std::fs::create_dir_all(ws.rootfs("web")).expect("mkdir");

        ws.delete("web", None).expect("delete");
        assert!(!dir.path().join("writable/web").exists());
        assert!(!ws.rootfs("web").exists());
        ws.delete("web", None).expect("delete twice");
    }
}
