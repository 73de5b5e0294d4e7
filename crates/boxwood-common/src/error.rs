//! Unified error type for the boxwood workspace.
//!
//! Variants fall into four groups: setup failures (always fatal to the
//! current operation), cleanup failures (aggregated, never fail-fast),
//! address exhaustion, and state-consistency rejections raised before any
//! mutation happens.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BoxError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Writing a cgroup control file failed.
    #[error("cgroup {controller}: cannot write {file}: {source}")]
    Cgroup {
        /// Controller name (`cpuset`, `memory`, `cpu`).
        controller: &'static str,
        /// Control file that was being written.
        file: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A mount, unmount or root pivot syscall failed.
    #[error("mount operation on {target} failed: {source}")]
    Mount {
        /// Mount target of the failing call.
        target: PathBuf,
        /// Errno returned by the kernel.
        source: nix::Error,
    },

    /// A namespace operation (clone, setns, restore) failed.
    #[error("namespace error: {message}")]
    Namespace {
        /// Description of the failure.
        message: String,
    },

    /// A rtnetlink request was rejected or could not be sent.
    #[error("netlink error: {message}")]
    Netlink {
        /// Description of the failure.
        message: String,
    },

    /// Installing or removing a packet filter rule failed.
    #[error("firewall error: {message}")]
    Firewall {
        /// Description of the failure.
        message: String,
    },

    /// A configuration value or user input is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// No free address is left in the subnet.
    #[error("subnet {subnet} has no free address left")]
    SubnetExhausted {
        /// Canonical CIDR of the exhausted subnet.
        subnet: String,
    },

    /// The operation conflicts with the current lifecycle state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the conflict.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A resource with the same identifier already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Type of the conflicting resource.
        kind: &'static str,
        /// Identifier of the conflicting resource.
        id: String,
    },

    /// A hash validation failed.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected hash value.
        expected: String,
        /// Actual computed hash value.
        actual: String,
    },

    /// One or more cleanup steps failed. Every step was still attempted.
    #[error("cleanup incomplete: {}", render_failures(failures))]
    Cleanup {
        /// Error of each failed step, in the order the steps ran.
        failures: Vec<BoxError>,
    },

    /// A named compensating step failed.
    #[error("{label}: {source}")]
    Step {
        /// Label the step was registered under.
        label: String,
        /// Error the step returned.
        source: Box<BoxError>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl BoxError {
    /// Builds an [`BoxError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Folds a list of cleanup failures into a single result.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Cleanup`] when `failures` is non-empty.
    pub fn check_cleanup(failures: Vec<Self>) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }
        Err(Self::Cleanup { failures })
    }

    /// Attaches the label of the step that produced `source`.
    pub fn step(label: impl Into<String>, source: Self) -> Self {
        Self::Step {
            label: label.into(),
            source: Box::new(source),
        }
    }
}

fn render_failures(failures: &[BoxError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BoxError>;
