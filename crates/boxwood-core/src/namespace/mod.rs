//! Linux namespace management for box isolation.
//!
//! A box gets fresh mount, PID, UTS, IPC and network namespaces at
//! `clone(2)` time. Two cases step into them afterwards: [`netns`]
//! configures a box's network stack from one thread of the runtime, and
//! [`enter`] moves a whole helper process in to run `boxwood exec`.

pub mod enter;
pub mod netns;

use nix::sched::CloneFlags;

/// Which namespaces a new box receives.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Isolate the PID namespace; the box's init becomes PID 1.
    pub pid: bool,
    /// Isolate the mount namespace.
    pub mount: bool,
    /// Isolate the network namespace.
    pub network: bool,
    /// Isolate the IPC namespace.
    pub ipc: bool,
    /// Isolate the UTS (hostname) namespace.
    pub uts: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            pid: true,
            mount: true,
            network: true,
            ipc: true,
            uts: true,
        }
    }
}

impl NamespaceConfig {
    /// Translates the configuration into `clone(2)` flags.
    #[must_use]
    pub fn clone_flags(&self) -> CloneFlags {
        [
            (self.uts, CloneFlags::CLONE_NEWUTS),
            (self.pid, CloneFlags::CLONE_NEWPID),
            (self.mount, CloneFlags::CLONE_NEWNS),
            (self.network, CloneFlags::CLONE_NEWNET),
            (self.ipc, CloneFlags::CLONE_NEWIPC),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .fold(CloneFlags::empty(), |acc, (_, flag)| acc | flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_isolates_every_supported_namespace() {
        let flags = NamespaceConfig::default().clone_flags();
        for flag in [
            CloneFlags::CLONE_NEWUTS,
            CloneFlags::CLONE_NEWPID,
            CloneFlags::CLONE_NEWNS,
            CloneFlags::CLONE_NEWNET,
            CloneFlags::CLONE_NEWIPC,
        ] {
            assert!(flags.contains(flag));
        }
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
    }

    #[test]
    fn disabled_namespace_is_left_out() {
        let config = NamespaceConfig {
            network: false,
            ..NamespaceConfig::default()
        };
        assert!(!config.clone_flags().contains(CloneFlags::CLONE_NEWNET));
    }
}
