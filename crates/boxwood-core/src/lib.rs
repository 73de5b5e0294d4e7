//! # boxwood-core
//!
//! Low-level Linux isolation primitives for the boxwood runtime.
//!
//! This crate provides safe abstractions over:
//! - **Cgroups v1**: `cpuset`, `memory` and `cpu` controllers behind one
//!   [`cgroup::Subsystem`] trait, driven by [`cgroup::CgroupManager`].
//! - **Namespaces**: clone flags for new boxes, the [`namespace::netns`]
//!   guard for temporarily entering a box's network namespace, and
//!   [`namespace::enter`] for joining a running box.
//! - **Filesystem**: `OverlayFS`, bind mounts, `pivot_root` and the
//!   pseudo-filesystems every box needs.
//! - **Bootstrap**: the first code that runs inside a new box.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! `// SAFETY:` documentation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bootstrap;
pub mod cgroup;
pub mod filesystem;
pub mod namespace;
