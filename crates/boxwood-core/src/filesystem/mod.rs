//! Filesystem management for box isolation.
//!
//! Provides `OverlayFS` layering for the writable root, `pivot_root` for
//! switching into it, and the pseudo-filesystem and bind mounts a box needs.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
