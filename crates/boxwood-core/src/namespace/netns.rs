//! Temporary entry into another process's network namespace.
//!
//! `setns(2)` switches only the calling thread. [`NetnsGuard`] records the
//! thread's namespace before switching and switches back when dropped, so
//! every exit path (including `?` and panics) restores it. The guard is
//! `!Send`: it must be dropped on the thread that created it.
//!
//! [`with_netns`] goes one step further and runs the work on a dedicated
//! scoped thread, so the caller's thread never changes namespace at all.

use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use boxwood_common::error::{BoxError, Result};
use nix::sched::{CloneFlags, setns};

/// Network namespace of the calling thread.
pub const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Path of the network namespace of `pid`.
#[must_use]
pub fn pid_netns_path(pid: i32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/net"))
}

/// RAII handle that keeps the current thread inside a foreign network namespace.
#[derive(Debug)]
pub struct NetnsGuard {
    original: File,
    target: PathBuf,
    _not_send: PhantomData<*const ()>,
}

impl NetnsGuard {
    /// Moves the calling thread into the network namespace at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if either namespace file cannot be opened or if
    /// `setns(2)` fails. On error the thread is still in its original namespace.
    pub fn enter(target: &Path) -> Result<Self> {
        let original = File::open(THREAD_NETNS).map_err(|e| BoxError::io(THREAD_NETNS, e))?;
        let ns = File::open(target).map_err(|e| BoxError::io(target, e))?;
        setns(&ns, CloneFlags::CLONE_NEWNET).map_err(|e| BoxError::Namespace {
            message: format!("setns into {} failed: {e}", target.display()),
        })?;
        tracing::debug!(netns = %target.display(), "entered network namespace");
        Ok(Self {
            original,
            target: target.to_path_buf(),
            _not_send: PhantomData,
        })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        match setns(&self.original, CloneFlags::CLONE_NEWNET) {
            Ok(()) => tracing::debug!(netns = %self.target.display(), "left network namespace"),
            Err(e) => tracing::error!(
                netns = %self.target.display(),
                error = %e,
                "failed to restore network namespace"
            ),
        }
    }
}

/// Runs `f` inside the network namespace at `target`.
///
/// The work happens on a fresh scoped thread holding a [`NetnsGuard`];
/// the calling thread's namespace is never touched. Netlink sockets and
/// other namespace-bound resources must be created inside `f`.
///
/// # Errors
///
/// Returns the error of entering the namespace or of `f` itself, or
/// [`BoxError::Namespace`] if the worker thread panicked.
pub fn with_netns<T, F>(target: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send,
    T: Send,
{
    std::thread::scope(|scope| {
        scope
            .spawn(move || {
                let _guard = NetnsGuard::enter(target)?;
                f()
            })
            .join()
            .map_err(|_| BoxError::Namespace {
                message: format!("worker in {} panicked", target.display()),
            })?
    })
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use super::*;

    fn thread_netns_inode() -> u64 {
        std::fs::metadata(THREAD_NETNS).expect("stat netns").ino()
    }

    fn is_root() -> bool {
        nix::unistd::geteuid().is_root()
    }

    #[test]
    fn missing_namespace_file_fails_without_running_closure() {
        let mut ran = false;
        let result = with_netns(Path::new("/proc/nonexistent/ns/net"), || {
            ran = true;
            Ok(())
        });
        assert!(matches!(result, Err(BoxError::Io { .. })));
        assert!(!ran);
    }

    #[test]
    fn pid_path_points_into_proc() {
        assert_eq!(pid_netns_path(42), PathBuf::from("/proc/42/ns/net"));
    }

    #[test]
    fn guard_restores_namespace_when_work_fails() {
        if !is_root() {
            eprintln!("Skipping guard_restores_namespace_when_work_fails: requires root");
            return;
        }

        fn configure_inside(target: &Path) -> Result<()> {
            let _guard = NetnsGuard::enter(target)?;
            Err(BoxError::Netlink {
                message: "injected failure".into(),
            })
        }

        std::thread::spawn(|| {
            // Give this thread its own namespace so the host one is "foreign".
            nix::sched::unshare(CloneFlags::CLONE_NEWNET).expect("unshare");
            let before = thread_netns_inode();
            let host = pid_netns_path(1);
            assert!(configure_inside(&host).is_err());
            assert_eq!(thread_netns_inode(), before);
        })
        .join()
        .expect("worker");
    }

    #[test]
    fn with_netns_leaves_caller_thread_alone() {
        if !is_root() {
            eprintln!("Skipping with_netns_leaves_caller_thread_alone: requires root");
            return;
        }

        std::thread::spawn(|| {
            nix::sched::unshare(CloneFlags::CLONE_NEWNET).expect("unshare");
            let before = thread_netns_inode();
            let host_inode = std::fs::metadata(pid_netns_path(1)).expect("stat").ino();
            let seen = with_netns(&pid_netns_path(1), || Ok(thread_netns_inode()))
                .expect("with_netns");
            assert_eq!(seen, host_inode);
            assert_eq!(thread_netns_inode(), before);
        })
        .join()
        .expect("worker");
    }
}
