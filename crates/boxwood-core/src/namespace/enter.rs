//! Joining the namespaces of a running box.
//!
//! `boxwood exec` re-executes the binary as `boxwood enter <pid> -- CMD...`.
//! That fresh process is still single-threaded, which `setns(2)` requires
//! for the mount namespace. It joins the box's IPC, UTS, network, PID and
//! mount namespaces in that order, then forks the command: a PID namespace
//! only applies to children of the joining process.

use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use boxwood_common::error::{BoxError, Result};
use nix::sched::{CloneFlags, setns};

/// Namespaces joined by [`join`], in joining order. The mount namespace
/// comes last so the `/proc/<pid>/ns` paths stay valid until then.
pub const JOIN_ORDER: [(&str, CloneFlags); 5] = [
    ("ipc", CloneFlags::CLONE_NEWIPC),
    ("uts", CloneFlags::CLONE_NEWUTS),
    ("net", CloneFlags::CLONE_NEWNET),
    ("pid", CloneFlags::CLONE_NEWPID),
    ("mnt", CloneFlags::CLONE_NEWNS),
];

/// Path of namespace `kind` of `pid`.
#[must_use]
pub fn ns_path(pid: i32, kind: &str) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/{kind}"))
}

/// Moves the calling process into every namespace of box init `pid` and
/// changes to the box's root directory.
///
/// Every namespace file is opened before the first `setns(2)`, so a box that
/// vanished is detected while the process is still untouched.
///
/// # Errors
///
/// Returns [`BoxError::Io`] if a namespace file cannot be opened, or
/// [`BoxError::Namespace`] if joining fails (for example because the
/// process is multi-threaded or lacks `CAP_SYS_ADMIN`).
pub fn join(pid: i32) -> Result<()> {
    let handles = JOIN_ORDER
        .iter()
        .map(|&(kind, flag)| {
            let path = ns_path(pid, kind);
            File::open(&path)
                .map(|file| (kind, flag, file))
                .map_err(|e| BoxError::io(path, e))
        })
        .collect::<Result<Vec<_>>>()?;

    for (kind, flag, file) in &handles {
        setns(file, *flag).map_err(|e| BoxError::Namespace {
            message: format!("setns into {kind} namespace of {pid} failed: {e}"),
        })?;
        tracing::debug!(pid, namespace = kind, "joined namespace");
    }
    std::env::set_current_dir("/").map_err(|e| BoxError::io("/", e))?;
    tracing::info!(pid, "joined box namespaces");
    Ok(())
}

/// Shell-style exit code: the exit status, or `128 + signal`.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

/// Runs `argv` as a child of the calling process and waits for it.
/// `argv[0]` is resolved on `PATH` as seen from the current mount namespace.
///
/// # Errors
///
/// Returns [`BoxError::Config`] for an empty `argv`, [`BoxError::NotFound`]
/// if the program cannot be resolved, or an error if it cannot be started.
pub fn spawn_and_wait(argv: &[String]) -> Result<i32> {
    let Some((program, args)) = argv.split_first() else {
        return Err(BoxError::Config {
            message: "nothing to execute".into(),
        });
    };
    let path = which::which(program).map_err(|e| BoxError::NotFound {
        kind: "executable",
        id: format!("{program}: {e}"),
    })?;
    let status = Command::new(&path)
        .args(args)
        .status()
        .map_err(|e| BoxError::io(&path, e))?;
    let code = exit_code(status);
    tracing::debug!(path = %path.display(), code, "command in box finished");
    Ok(code)
}
