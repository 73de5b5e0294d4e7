//! Discovery of cgroup v1 controller mount points.
//!
//! Parses lines in `/proc/[pid]/mountinfo` format. See
//! [`proc_pid_mountinfo(5)`](https://man7.org/linux/man-pages/man5/proc_pid_mountinfo.5.html).

use std::io::BufRead;
use std::path::{Path, PathBuf};

use boxwood_common::error::{BoxError, Result};

/// Mountinfo of the calling process.
pub const SELF_MOUNTINFO: &str = "/proc/self/mountinfo";

/// The fields of one mountinfo line this crate cares about.
#[derive(Debug, PartialEq, Eq)]
pub struct MountEntry<'a> {
    /// Mount point relative to the process's root.
    pub mount_point: &'a str,
    /// Filesystem type, `cgroup` for v1 hierarchies.
    pub fs_type: &'a str,
    /// Superblock options; v1 hierarchies list their controllers here.
    pub super_options: &'a str,
}

/// Parses one mountinfo line. Returns `None` for malformed lines.
pub fn parse_line(line: &str) -> Option<MountEntry<'_>> {
    let (pre, post) = line.split_once(" - ")?;
    let mount_point = pre.split_whitespace().nth(4)?;
    let mut post_fields = post.split_whitespace();
    let fs_type = post_fields.next()?;
    let _source = post_fields.next()?;
    let super_options = post_fields.next()?;
    Some(MountEntry {
        mount_point,
        fs_type,
        super_options,
    })
}

/// Finds the v1 hierarchy that carries `controller` in a mountinfo stream.
///
/// # Errors
///
/// Returns an I/O error if reading fails, or [`BoxError::NotFound`] if no
/// `cgroup` mount lists the controller.
pub fn find_controller_mount<R: BufRead>(
    reader: R,
    origin: &Path,
    controller: &str,
) -> Result<PathBuf> {
    for line in reader.lines() {
        let line = line.map_err(|e| BoxError::io(origin, e))?;
        let Some(entry) = parse_line(&line) else {
            continue;
        };
        if entry.fs_type == "cgroup" && entry.super_options.split(',').any(|o| o == controller) {
            return Ok(PathBuf::from(entry.mount_point));
        }
    }
    Err(BoxError::NotFound {
        kind: "cgroup v1 hierarchy",
        id: controller.to_string(),
    })
}

/// Finds the mount point of `controller` in [`SELF_MOUNTINFO`].
///
/// # Errors
///
/// Same as [`find_controller_mount`], plus failure to open the file.
pub fn controller_mount_point(controller: &str) -> Result<PathBuf> {
    let path = Path::new(SELF_MOUNTINFO);
    let file = std::fs::File::open(path).map_err(|e| BoxError::io(path, e))?;
    let mount = find_controller_mount(std::io::BufReader::new(file), path, controller)?;
    tracing::debug!(controller, mount = %mount.display(), "cgroup hierarchy found");
    Ok(mount)
}
