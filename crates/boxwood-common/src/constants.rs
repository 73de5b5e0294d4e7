//! System-wide constants and default paths.

/// Default state root on a Linux host.
pub const DEFAULT_ROOT: &str = "/var/lib/boxwood";

/// Environment variable overriding the state root.
pub const ROOT_ENV: &str = "BOXWOOD_ROOT";

/// Environment variable pinning a fixed cgroup v1 hierarchy root.
pub const CGROUP_ROOT_ENV: &str = "BOXWOOD_CGROUP_ROOT";

/// Unpacked image root filesystems, one directory per image.
pub const IMAGE_DIR: &str = "image";

/// Per-box data directories (`config.json`, `output.log`, `rootfs/`).
pub const BOX_DIR: &str = "box";

/// Overlay upper and work directories, one per box.
pub const WRITABLE_DIR: &str = "writable";

/// Persisted network records, one file per network.
pub const NETWORK_DIR: &str = "network";

/// IPAM state, relative to the state root.
pub const IPAM_FILE: &str = "ipam/subnet.json";

/// Box metadata file name inside a box directory.
pub const RECORD_FILE: &str = "config.json";

/// Detached box output file name inside a box directory.
pub const LOG_FILE: &str = "output.log";

/// Merged root filesystem directory name inside a box directory.
pub const ROOTFS_DIR: &str = "rootfs";

/// Descriptor slot the init process reads its command from.
pub const INIT_PIPE_FD: i32 = 3;

/// Hidden subcommand that runs the bootstrap inside new namespaces.
pub const INIT_SUBCOMMAND: &str = "init";

/// Hidden subcommand that joins a running box's namespaces for `exec`.
pub const ENTER_SUBCOMMAND: &str = "enter";

/// Maximum interface name length (`IFNAMSIZ - 1`).
pub const MAX_IFNAME_LEN: usize = 15;

/// Application name used in CLI output.
pub const APP_NAME: &str = "boxwood";
