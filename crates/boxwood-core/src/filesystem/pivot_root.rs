//! Root filesystem switching via `pivot_root(2)`.
//!
//! Unlike `chroot`, the old root is actually detached from the mount
//! namespace, so nothing under it stays reachable from inside the box.

use std::path::Path;

use boxwood_common::error::{BoxError, Result};
use nix::mount::{MntFlags, MsFlags, mount, umount2};

/// Directory under the new root where the old root is parked during the pivot.
pub const PUT_OLD: &str = ".old_root";

fn mount_err(target: &Path) -> impl FnOnce(nix::Error) -> BoxError + '_ {
    move |source| BoxError::Mount {
        target: target.to_path_buf(),
        source,
    }
}

/// Makes `new_root` the root of the calling mount namespace.
///
/// Propagation on `/` is made private first so none of this leaks back to
/// the host. `new_root` is then bind mounted onto itself, because
/// `pivot_root(2)` requires the new root to be a mount point. Afterwards
/// the working directory is `/` and the old root is gone.
///
/// # Errors
///
/// Returns [`BoxError::Mount`] naming the step that failed.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    let put_old = new_root.join(PUT_OLD);
    std::fs::create_dir_all(&put_old).map_err(|e| BoxError::io(&put_old, e))?;

    let root = Path::new("/");
    mount(
        None::<&str>,
        root,
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(mount_err(root))?;
    mount(
        Some(new_root),
        new_root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(mount_err(new_root))?;

    nix::unistd::pivot_root(new_root, &put_old).map_err(mount_err(new_root))?;
    nix::unistd::chdir(root).map_err(mount_err(root))?;

    let old = root.join(PUT_OLD);
    umount2(&old, MntFlags::MNT_DETACH).map_err(mount_err(&old))?;
    std::fs::remove_dir(&old).map_err(|e| BoxError::io(&old, e))?;

    tracing::info!(new_root = %new_root.display(), "root pivoted");
    Ok(())
}
