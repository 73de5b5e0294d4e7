//! Runtime configuration model.
//!
//! Every on-disk location the runtime touches is derived from a single
//! state root so tests and alternative installs can relocate all of it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root configuration for the boxwood runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Base directory for all runtime state.
    pub root: PathBuf,
    /// Fixed cgroup v1 hierarchy root. `None` discovers mount points
    /// from `/proc/self/mountinfo`.
    pub cgroup_root: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(constants::DEFAULT_ROOT),
            cgroup_root: None,
        }
    }
}

impl RuntimeConfig {
    /// Builds a configuration rooted at `root`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cgroup_root: None,
        }
    }

    /// Builds a configuration from `BOXWOOD_ROOT` and `BOXWOOD_CGROUP_ROOT`,
    /// falling back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let root = std::env::var_os(constants::ROOT_ENV)
            .map_or_else(|| PathBuf::from(constants::DEFAULT_ROOT), PathBuf::from);
        let cgroup_root = std::env::var_os(constants::CGROUP_ROOT_ENV).map(PathBuf::from);
        Self { root, cgroup_root }
    }

    /// Directory holding unpacked images.
    #[must_use]
    pub fn image_dir(&self) -> PathBuf {
        self.root.join(constants::IMAGE_DIR)
    }

    /// Directory holding per-box data.
    #[must_use]
    pub fn box_dir(&self) -> PathBuf {
        self.root.join(constants::BOX_DIR)
    }

    /// Directory holding overlay upper and work layers.
    #[must_use]
    pub fn writable_dir(&self) -> PathBuf {
        self.root.join(constants::WRITABLE_DIR)
    }

    /// Directory holding persisted network records.
    #[must_use]
    pub fn network_dir(&self) -> PathBuf {
        self.root.join(constants::NETWORK_DIR)
    }

    /// IPAM persistence file.
    #[must_use]
    pub fn ipam_file(&self) -> PathBuf {
        self.root.join(constants::IPAM_FILE)
    }

    /// Returns the state root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
