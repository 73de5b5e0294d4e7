//! Mount utilities for box filesystem setup.
//!
//! `/proc` and `/dev` are mounted from inside the box after the root pivot.
//! Bind volumes are mounted from the host into the merged root before the
//! box starts.

use std::path::Path;

use boxwood_common::error::{BoxError, Result};
use nix::mount::{MntFlags, MsFlags};

fn mount_fs(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    nix::mount::mount(source, target, fstype, flags, data).map_err(|source| BoxError::Mount {
        target: target.to_path_buf(),
        source,
    })
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| BoxError::io(path, e))
}

/// Mounts a fresh `proc` at `<root>/proc`.
///
/// Must run inside the box's PID namespace so the listing reflects it.
///
/// # Errors
///
/// Returns [`BoxError::Mount`] if `mount(2)` fails.
pub fn mount_proc(root: &Path) -> Result<()> {
    let target = root.join("proc");
    ensure_dir(&target)?;
    mount_fs(
        Some(Path::new("proc")),
        &target,
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None,
    )?;
    tracing::debug!(target = %target.display(), "proc mounted");
    Ok(())
}

/// Mounts a `tmpfs` at `<root>/dev`.
///
/// # Errors
///
/// Returns [`BoxError::Mount`] if `mount(2)` fails.
pub fn mount_dev(root: &Path) -> Result<()> {
    let target = root.join("dev");
    ensure_dir(&target)?;
    mount_fs(
        Some(Path::new("tmpfs")),
        &target,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )?;
    tracing::debug!(target = %target.display(), "dev tmpfs mounted");
    Ok(())
}

/// Creates a bind mount from `source` to `target`, creating both directories
/// if they are missing.
///
/// # Errors
///
/// Returns an error if directory creation or `mount(2)` fails.
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    ensure_dir(source)?;
    ensure_dir(target)?;
    mount_fs(Some(source), target, None, MsFlags::MS_BIND, None)?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "bind mount created"
    );
    Ok(())
}

/// Lazily detaches whatever is mounted at `target`.
///
/// A target that is not mounted is not an error.
///
/// # Errors
///
/// Returns [`BoxError::Mount`] for any other `umount2(2)` failure.
pub fn unmount(target: &Path) -> Result<()> {
    match nix::mount::umount2(target, MntFlags::MNT_DETACH) {
        Ok(()) => {
            tracing::debug!(target = %target.display(), "unmounted");
            Ok(())
        }
        Err(nix::errno::Errno::EINVAL | nix::errno::Errno::ENOENT) => Ok(()),
        Err(source) => Err(BoxError::Mount {
            target: target.to_path_buf(),
            source,
        }),
    }
}
