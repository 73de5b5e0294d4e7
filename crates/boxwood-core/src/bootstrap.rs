//! First code that runs inside a freshly cloned box.
//!
//! The launcher starts `boxwood init` with the merged root as working
//! directory and the read end of a pipe on descriptor
//! [`INIT_PIPE_FD`]. The parent writes the user command once the box is
//! admitted to its cgroups and wired to its network, then closes the pipe.
//! Until then [`run`] blocks on the read, so the user command never runs
//! unconstrained.

use std::convert::Infallible;
use std::ffi::CString;
use std::fs::File;
use std::io::Read;
use std::os::fd::FromRawFd;
use std::path::Path;

use boxwood_common::constants::INIT_PIPE_FD;
use boxwood_common::error::{BoxError, Result};

use crate::filesystem::{mount, pivot_root};

/// Splits the command received over the init pipe.
///
/// Pieces are separated by single spaces; empty pieces are dropped.
///
/// # Errors
///
/// Returns [`BoxError::Config`] if no argument is left.
pub fn parse_command(raw: &str) -> Result<Vec<String>> {
    let argv: Vec<String> = raw
        .split(' ')
        .filter(|piece| !piece.is_empty())
        .map(str::to_owned)
        .collect();
    if argv.is_empty() {
        return Err(BoxError::Config {
            message: "init pipe delivered an empty command".into(),
        });
    }
    Ok(argv)
}

/// Reads `reader` to EOF and parses the command it carried.
///
/// # Errors
///
/// Returns an error if reading fails or the command is empty.
pub fn read_command<R: Read>(mut reader: R) -> Result<Vec<String>> {
    let mut raw = String::new();
    let _ = reader
        .read_to_string(&mut raw)
        .map_err(|e| BoxError::io(format!("fd {INIT_PIPE_FD}"), e))?;
    parse_command(&raw)
}

#[allow(unsafe_code)]
fn read_init_pipe() -> Result<Vec<String>> {
    // SAFETY: the launcher dup2()s the pipe read end onto INIT_PIPE_FD before
    // exec and nothing else in this process owns that descriptor, so taking
    // ownership here is sound. It is closed when `pipe` drops.
    let pipe = unsafe { File::from_raw_fd(INIT_PIPE_FD) };
    read_command(pipe)
}

/// Pivots into the working directory and mounts `/proc` and `/dev`.
///
/// # Errors
///
/// Returns the first failing mount step.
pub fn setup_mounts() -> Result<()> {
    let new_root = std::env::current_dir().map_err(|e| BoxError::io(".", e))?;
    tracing::debug!(root = %new_root.display(), "setting up box mounts");
    pivot_root::pivot_root(&new_root)?;
    let root = Path::new("/");
    mount::mount_proc(root)?;
    mount::mount_dev(root)?;
    Ok(())
}

/// Resolves `argv[0]` on `PATH` and replaces the process image with it.
///
/// # Errors
///
/// Only returns on failure: unresolvable binary, interior NUL byte, or `execv(2)` error.
pub fn exec(argv: &[String]) -> Result<Infallible> {
    let Some(program) = argv.first() else {
        return Err(BoxError::Config {
            message: "nothing to execute".into(),
        });
    };
    let path = which::which(program).map_err(|e| BoxError::NotFound {
        kind: "executable",
        id: format!("{program}: {e}"),
    })?;
    let to_cstring = |s: &str| {
        CString::new(s).map_err(|_| BoxError::Config {
            message: format!("argument contains a NUL byte: {s:?}"),
        })
    };
    let c_path = to_cstring(&path.to_string_lossy())?;
    let c_args = argv
        .iter()
        .map(|arg| to_cstring(arg))
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(path = %path.display(), "executing box command");
    nix::unistd::execv(&c_path, &c_args).map_err(|e| BoxError::Namespace {
        message: format!("execv {} failed: {e}", path.display()),
    })
}

/// Full bootstrap: wait for the command, isolate the filesystem, exec.
///
/// # Errors
///
/// Only returns on failure; the caller should exit non-zero.
pub fn run() -> Result<Infallible> {
    let argv = read_init_pipe()?;
    tracing::debug!(argv = ?argv, "init received command");
    setup_mounts()?;
    exec(&argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_split_on_spaces_without_empty_pieces() {
        let argv = read_command("sh  -c   top".as_bytes()).expect("parse");
        assert_eq!(argv, vec!["sh", "-c", "top"]);
    }

    #[test]
    fn empty_or_blank_command_is_rejected() {
        assert!(matches!(parse_command(""), Err(BoxError::Config { .. })));
        assert!(matches!(parse_command("   "), Err(BoxError::Config { .. })));
    }

    #[test]
    fn exec_of_unknown_program_fails_before_execv() {
        let err = exec(&["definitely-not-a-real-binary-xyz".to_string()]).unwrap_err();
        assert!(matches!(err, BoxError::NotFound { .. }));
    }

    #[test]
    fn exec_rejects_empty_argv() {
        assert!(matches!(exec(&[]), Err(BoxError::Config { .. })));
    }
}
