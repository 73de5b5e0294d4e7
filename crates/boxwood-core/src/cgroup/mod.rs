//! Cgroups v1 resource management.
//!
//! Each kernel controller is a [`Subsystem`]. The [`CgroupManager`] fans a
//! container ID out to every entry of the fixed [`SUBSYSTEMS`] list, using
//! `<controller-mount>/<containerID>` as the per-container directory.
//!
//! `set` and `apply` are pre-admission steps and stop at the first failure.
//! `destroy` is cleanup and always visits every controller.

pub mod cpu;
pub mod cpuset;
pub mod memory;
pub mod mountinfo;

use std::path::{Path, PathBuf};

use boxwood_common::error::{BoxError, Result};
use boxwood_common::types::ResourceConfig;

/// Task membership file of a v1 cgroup.
pub const TASKS_FILE: &str = "tasks";

/// One kernel resource controller.
pub trait Subsystem: Sync {
    /// Controller name as it appears in mount options (`cpuset`, `memory`, `cpu`).
    fn name(&self) -> &'static str;

    /// Writes this controller's share of `res` into the cgroup at `cgroup`.
    ///
    /// Fields left `None` are written as the controller's neutral default.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Cgroup`] naming the file that could not be written.
    fn set(&self, cgroup: &Path, res: &ResourceConfig) -> Result<()>;

    /// Moves `pid` into the cgroup at `cgroup`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Cgroup`] if the membership file cannot be written.
    fn apply(&self, cgroup: &Path, pid: i32) -> Result<()> {
        write_control_file(self.name(), cgroup, TASKS_FILE, &pid.to_string())
    }

    /// Removes the cgroup directory. A directory that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Io`] if the directory exists but cannot be removed.
    fn remove(&self, cgroup: &Path) -> Result<()> {
        remove_cgroup_dir(cgroup)
    }
}

/// Every controller a box is placed under, in application order.
pub static SUBSYSTEMS: &[&dyn Subsystem] = &[
    &cpuset::CpusetSubsystem,
    &memory::MemorySubsystem,
    &cpu::CpuSubsystem,
];

/// Where controller hierarchies are mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hierarchy {
    /// Look each controller up in `/proc/self/mountinfo`.
    Mountinfo,
    /// Use `<root>/<controller>` for every controller.
    Fixed(PathBuf),
}

impl Hierarchy {
    /// Builds a hierarchy from an optional fixed root.
    #[must_use]
    pub fn from_root(root: Option<PathBuf>) -> Self {
        root.map_or(Self::Mountinfo, Self::Fixed)
    }

    /// Resolves the mount point of `controller`.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is not mounted.
    pub fn mount_point(&self, controller: &str) -> Result<PathBuf> {
        match self {
            Self::Mountinfo => mountinfo::controller_mount_point(controller),
            Self::Fixed(root) => Ok(root.join(controller)),
        }
    }
}

/// Resource envelope of one container across every registered controller.
#[derive(Debug)]
pub struct CgroupManager {
    container_id: String,
    hierarchy: Hierarchy,
}

impl CgroupManager {
    /// Creates a manager for `container_id`. Nothing is written until [`Self::set`].
    #[must_use]
    pub fn new(container_id: impl Into<String>, hierarchy: Hierarchy) -> Self {
        Self {
            container_id: container_id.into(),
            hierarchy,
        }
    }

    /// Per-container directory of `subsystem`.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller's hierarchy cannot be located.
    pub fn cgroup_path(&self, subsystem: &dyn Subsystem) -> Result<PathBuf> {
        Ok(self
            .hierarchy
            .mount_point(subsystem.name())?
            .join(&self.container_id))
    }

    /// Writes the resource limits for every controller.
    ///
    /// Must run before [`Self::apply`] so limits are in place before the
    /// process is admitted.
    ///
    /// # Errors
    ///
    /// Returns the first controller failure.
    pub fn set(&self, res: &ResourceConfig) -> Result<()> {
        for subsystem in SUBSYSTEMS {
            let path = self.cgroup_path(*subsystem)?;
            subsystem.set(&path, res)?;
        }
        tracing::info!(id = %self.container_id, "cgroup limits set");
        Ok(())
    }

    /// Places `pid` under every controller.
    ///
    /// # Errors
    ///
    /// Returns the first controller failure.
    pub fn apply(&self, pid: i32) -> Result<()> {
        for subsystem in SUBSYSTEMS {
            let path = self.cgroup_path(*subsystem)?;
            subsystem.apply(&path, pid)?;
        }
        tracing::info!(id = %self.container_id, pid, "process admitted to cgroups");
        Ok(())
    }

    /// Removes the container's directory under every controller.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Cleanup`] listing every controller that failed.
    /// The remaining controllers are still processed.
    pub fn destroy(&self) -> Result<()> {
        let mut failures = Vec::new();
        for subsystem in SUBSYSTEMS {
            let outcome = self
                .cgroup_path(*subsystem)
                .and_then(|path| subsystem.remove(&path));
            if let Err(e) = outcome {
                tracing::warn!(controller = subsystem.name(), error = %e, "cgroup removal failed");
                failures.push(e);
            }
        }
        BoxError::check_cleanup(failures)?;
        tracing::info!(id = %self.container_id, "cgroups destroyed");
        Ok(())
    }
}

/// Writes `value` to `<cgroup>/<file>`, creating the cgroup directory first.
///
/// # Errors
///
/// Returns [`BoxError::Cgroup`] on any I/O failure.
pub fn write_control_file(
    controller: &'static str,
    cgroup: &Path,
    file: &str,
    value: &str,
) -> Result<()> {
    std::fs::create_dir_all(cgroup).map_err(|source| BoxError::Cgroup {
        controller,
        file: cgroup.to_path_buf(),
        source,
    })?;
    let target = cgroup.join(file);
    std::fs::write(&target, value).map_err(|source| BoxError::Cgroup {
        controller,
        file: target.clone(),
        source,
    })?;
    tracing::debug!(controller, file, value, "cgroup file written");
    Ok(())
}

/// Removes a cgroup directory.
///
/// Kernel cgroup directories only accept `rmdir(2)` (their control files
/// cannot be unlinked), so that is tried first. An ordinary directory tree
/// falls back to recursive removal.
///
/// # Errors
///
/// Returns [`BoxError::Io`] if both attempts fail.
pub fn remove_cgroup_dir(cgroup: &Path) -> Result<()> {
    if !cgroup.exists() {
        return Ok(());
    }
    if std::fs::remove_dir(cgroup).is_ok() {
        tracing::debug!(path = %cgroup.display(), "cgroup removed");
        return Ok(());
    }
    std::fs::remove_dir_all(cgroup).map_err(|e| BoxError::io(cgroup, e))?;
    tracing::debug!(path = %cgroup.display(), "cgroup removed");
    Ok(())
}
