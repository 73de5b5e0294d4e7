//! Process spawning inside fresh namespaces.
//!
//! [`spawn_init`] clones a child into new UTS, PID, mount, network and IPC
//! namespaces and re-executes the current binary as `boxwood init` inside
//! the box's root filesystem. The child blocks reading descriptor
//! [`INIT_PIPE_FD`] until the parent calls [`InitProcess::send_command`].
//!
//! Everything the child touches between `clone(2)` and `execve(2)` is
//! prepared beforehand; the child only calls async-signal-safe functions.

use std::ffi::{CString, OsStr, OsString};
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use boxwood_common::constants::{APP_NAME, ENTER_SUBCOMMAND, INIT_PIPE_FD, INIT_SUBCOMMAND};
use boxwood_common::error::{BoxError, Result};
use boxwood_core::namespace::{NamespaceConfig, enter};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

const STACK_SIZE: usize = 1024 * 1024;
const SELF_EXE: &str = "/proc/self/exe";
const EXIT_EXEC_FAILED: isize = 127;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A freshly cloned box init waiting for its command.
#[derive(Debug)]
pub struct InitProcess {
    pid: Pid,
    pipe: OwnedFd,
}

impl InitProcess {
    /// Host PID of the box init.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Hands `command` to the waiting init and closes the pipe, releasing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe cannot be written (the child is gone).
    pub fn send_command(self, command: &[String]) -> Result<()> {
        let mut pipe = File::from(self.pipe);
        pipe.write_all(command.join(" ").as_bytes())
            .map_err(|e| BoxError::io("init pipe", e))?;
        tracing::debug!(pid = %self.pid, "init pipe released");
        Ok(())
    }
}

fn nul_free(bytes: Vec<u8>) -> Result<CString> {
    CString::new(bytes).map_err(|e| BoxError::Config {
        message: format!("argument contains a NUL byte: {e}"),
    })
}

/// Program, arguments and environment of the init exec, with the pointer
/// arrays `execve(2)` needs already built.
struct ExecImage {
    path: CString,
    _argv: Vec<CString>,
    _envp: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    envp_ptrs: Vec<*const libc::c_char>,
}

impl ExecImage {
    /// The current binary re-executed as `boxwood init`.
    fn init(extra_env: &[String]) -> Result<Self> {
        Self::new(SELF_EXE, &[APP_NAME, INIT_SUBCOMMAND], extra_env)
    }

    fn new(path: &str, args: &[&str], extra_env: &[String]) -> Result<Self> {
        let argv = args
            .iter()
            .map(|arg| nul_free((*arg).into()))
            .collect::<Result<Vec<_>>>()?;
        let mut envp = Vec::new();
        for (key, value) in std::env::vars_os() {
            let mut pair = key;
            pair.push("=");
            pair.push(value);
            envp.push(nul_free(pair.into_vec())?);
        }
        for pair in extra_env {
            envp.push(nul_free(OsString::from(pair).into_vec())?);
        }
        let argv_ptrs = to_ptrs(&argv);
        let envp_ptrs = to_ptrs(&envp);
        Ok(Self {
            path: nul_free(path.into())?,
            _argv: argv,
            _envp: envp,
            argv_ptrs,
            envp_ptrs,
        })
    }
}

fn to_ptrs(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// Runs in the cloned child. Returns only when something failed.
///
/// Output is redirected before the pipe is moved onto [`INIT_PIPE_FD`]:
/// the log may itself occupy that slot, and `dup2` would close it.
fn child_main(pipe_read: RawFd, log: Option<RawFd>, rootfs: &CString, image: &ExecImage) -> isize {
    // SAFETY: plain descriptor and path syscalls on values prepared before
    // clone; no allocation happens here.
    unsafe {
        if let Some(fd) = log {
            if libc::dup2(fd, libc::STDOUT_FILENO) < 0 || libc::dup2(fd, libc::STDERR_FILENO) < 0
            {
                return EXIT_EXEC_FAILED;
            }
        }
        if pipe_read == INIT_PIPE_FD {
            if libc::fcntl(INIT_PIPE_FD, libc::F_SETFD, 0) < 0 {
                return EXIT_EXEC_FAILED;
            }
        } else if libc::dup2(pipe_read, INIT_PIPE_FD) < 0 {
            return EXIT_EXEC_FAILED;
        }
        if libc::chdir(rootfs.as_ptr()) < 0 {
            return EXIT_EXEC_FAILED;
        }
        let _ = libc::execve(
            image.path.as_ptr(),
            image.argv_ptrs.as_ptr(),
            image.envp_ptrs.as_ptr(),
        );
    }
    EXIT_EXEC_FAILED
}

/// Clones the box init for `rootfs`.
///
/// `extra_env` entries (`KEY=VALUE`) are appended to the inherited
/// environment. With `log` set, the box's stdout and stderr go to that file;
/// otherwise they are inherited.
///
/// # Errors
///
/// Returns [`BoxError::Namespace`] if `clone(2)` fails (usually missing
/// privileges), or an error if the pipe cannot be created.
pub fn spawn_init(rootfs: &Path, extra_env: &[String], log: Option<&File>) -> Result<InitProcess> {
    let image = ExecImage::init(extra_env)?;
    let rootfs_c = nul_free(rootfs.as_os_str().to_owned().into_vec())?;
    let (pipe_read, pipe_write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| BoxError::io("init pipe", std::io::Error::from(e)))?;
    let read_fd = pipe_read.as_raw_fd();
    let log_fd = log.map(AsRawFd::as_raw_fd);

    let flags = NamespaceConfig::default().clone_flags();
    let mut stack = vec![0u8; STACK_SIZE];
    let callback = Box::new(|| child_main(read_fd, log_fd, &rootfs_c, &image));

    // SAFETY: the child runs in its own copy of the address space (no
    // CLONE_VM) and only executes `child_main`, which sticks to
    // async-signal-safe calls before exec.
    let pid = unsafe { nix::sched::clone(callback, &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(|e| BoxError::Namespace {
            message: format!("clone failed: {e}"),
        })?;
    drop(pipe_read);

    tracing::info!(
        pid = %pid,
        rootfs = %rootfs.display(),
        flags = ?flags,
        "box init cloned"
    );
    Ok(InitProcess {
        pid,
        pipe: pipe_write,
    })
}

/// Splits a NUL-separated `environ` block into variables. Entries without
/// `=` are skipped.
#[must_use]
pub fn parse_environ(raw: &[u8]) -> Vec<(OsString, OsString)> {
    raw.split(|&b| b == 0)
        .filter_map(|entry| {
            let eq = entry.iter().position(|&b| b == b'=')?;
            let (key, value) = entry.split_at(eq);
            if key.is_empty() {
                return None;
            }
            Some((
                OsStr::from_bytes(key).to_owned(),
                OsStr::from_bytes(&value[1..]).to_owned(),
            ))
        })
        .collect()
}

/// Environment of the running process `pid`.
///
/// # Errors
///
/// Returns an error if `/proc/<pid>/environ` cannot be read.
pub fn read_environ(pid: Pid) -> Result<Vec<(OsString, OsString)>> {
    let path = format!("/proc/{pid}/environ");
    let raw = std::fs::read(&path).map_err(|e| BoxError::io(path, e))?;
    Ok(parse_environ(&raw))
}

/// Runs `command` inside the namespaces of box init `pid` and waits for it.
///
/// The current binary is re-executed as `boxwood enter <pid> -- CMD...`
/// with stdio inherited and `env` layered over the current environment.
///
/// # Errors
///
/// Returns an error if the helper cannot be started.
pub fn exec_in(pid: Pid, env: &[(OsString, OsString)], command: &[String]) -> Result<i32> {
    let status = Command::new(SELF_EXE)
        .arg(ENTER_SUBCOMMAND)
        .arg(pid.to_string())
        .arg("--")
        .args(command)
        .envs(env.iter().map(|(key, value)| (key, value)))
        .status()
        .map_err(|e| BoxError::io(SELF_EXE, e))?;
    Ok(enter::exit_code(status))
}

fn signal_error(pid: Pid, e: Errno) -> BoxError {
    BoxError::io(format!("/proc/{pid}"), std::io::Error::from(e))
}

/// Returns `true` while `pid` exists (zombies included).
#[must_use]
pub fn is_alive(pid: Pid) -> bool {
    kill(pid, None).is_ok()
}

/// Kills `pid` with `SIGKILL` and reaps it. A process that is already gone
/// is not an error.
///
/// # Errors
///
/// Returns an error if the signal cannot be delivered.
pub fn kill_and_reap(pid: Pid) -> Result<()> {
    match kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => return Err(signal_error(pid, e)),
    }
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => {}
            Ok(_) | Err(Errno::ECHILD) => break,
            Err(e) => return Err(signal_error(pid, e)),
        }
    }
    tracing::info!(pid = %pid, "process killed");
    Ok(())
}

/// Waits for the child `pid` to exit and returns a shell-style exit code
/// (`128 + signal` for a killed process).
///
/// # Errors
///
/// Returns an error if `pid` is not a child of this process.
pub fn wait_exit(pid: Pid) -> Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => return Err(signal_error(pid, e)),
        }
    }
}

/// Stops `pid`: `SIGTERM`, up to `grace` to exit, then `SIGKILL`.
///
/// A process that is already gone is not an error.
///
/// # Errors
///
/// Returns an error if a signal cannot be delivered for any reason other
/// than the process being gone.
pub fn terminate(pid: Pid, grace: Duration) -> Result<()> {
    match kill(pid, Signal::SIGTERM) {
        Ok(()) => tracing::info!(pid = %pid, "sent SIGTERM"),
        Err(Errno::ESRCH) => return Ok(()),
        Err(e) => return Err(signal_error(pid, e)),
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if reaped_or_gone(pid) {
            return Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    match kill(pid, Signal::SIGKILL) {
        Ok(()) => tracing::info!(pid = %pid, "sent SIGKILL"),
        Err(Errno::ESRCH) => {}
        Err(e) => return Err(signal_error(pid, e)),
    }
    Ok(())
}

/// Reaps `pid` if it is an exited child of ours, then reports whether it
/// is gone.
fn reaped_or_gone(pid: Pid) -> bool {
    use nix::sys::wait::WaitPidFlag;

    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => true,
        _ => !is_alive(pid),
    }
}
